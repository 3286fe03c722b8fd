//! Text-to-binary DSF conversion with Laminar's DSFTool.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};

use xpscene::{RunConfig, SceneryCompiler, SceneryError};

pub struct DsfTool {
    bin: PathBuf,
}

impl DsfTool {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    /// `dsf_tool_bin` when configured, else `DSFTool` next to the DSF text.
    pub fn locate(config: &RunConfig) -> Self {
        match &config.dsf_tool_bin {
            Some(bin) => Self::new(bin),
            None => Self::new(config.output_folder_for_the_dsf_text.join("DSFTool")),
        }
    }
}

impl SceneryCompiler for DsfTool {
    /// The text is fed on stdin, as in `cat <text> | DSFTool -text2dsf - <dsf>`.
    fn compile(&mut self, text: &Path, dsf: &Path) -> xpscene::Result<()> {
        if !self.bin.is_file() {
            return Err(SceneryError::Compiler(format!(
                "{} not found",
                self.bin.display()
            )));
        }

        let input = File::open(text)?;
        debug!("{} -text2dsf - {}", self.bin.display(), dsf.display());

        let output = Command::new(&self.bin)
            .args(["-text2dsf", "-"])
            .arg(dsf)
            .stdin(Stdio::from(input))
            .output()
            .map_err(|e| SceneryError::Compiler(format!("failed to start {}: {e}", self.bin.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SceneryError::Compiler(format!(
                "{} exited with {}: {}",
                self.bin.display(),
                output.status,
                stderr.trim()
            )));
        }

        info!("wrote {}", dsf.display());
        Ok(())
    }

    fn manual_command(&self, text: &Path, dsf: &Path) -> String {
        format!(
            "cat \"{}\" | \"{}\" -text2dsf - \"{}\"",
            text.display(),
            self.bin.display(),
            dsf.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_a_compiler_error() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("dsf.txt");
        std::fs::write(&text, "A\n800\nDSF2TEXT\n").unwrap();

        let mut tool = DsfTool::new(dir.path().join("DSFTool"));
        let err = tool.compile(&text, &dir.path().join("dsf.txt.dsf")).unwrap_err();
        assert!(matches!(err, SceneryError::Compiler(_)));
    }

    #[test]
    fn manual_command_pipes_the_text() {
        let tool = DsfTool::new("/opt/xptools/DSFTool");
        let cmd = tool.manual_command(Path::new("out/a.txt"), Path::new("out/a.txt.dsf"));
        assert_eq!(cmd, "cat \"out/a.txt\" | \"/opt/xptools/DSFTool\" -text2dsf - \"out/a.txt.dsf\"");
    }

    #[test]
    fn located_from_config() {
        let json = serde_json::json!({
            "osm_bbox": "32.0,34.7,32.1,34.9",
            "osm_json_file": "overpass.json",
            "blender_bin": "blender",
            "output_folder_for_the_dsf_text": "scenery",
        });
        let mut config = RunConfig::from_json_str(&json.to_string()).unwrap();
        assert_eq!(DsfTool::locate(&config).bin, PathBuf::from("scenery/DSFTool"));

        config.dsf_tool_bin = Some(PathBuf::from("/usr/local/bin/DSFTool"));
        assert_eq!(DsfTool::locate(&config).bin, PathBuf::from("/usr/local/bin/DSFTool"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_reports_its_status() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("dsf.txt");
        std::fs::write(&text, "A\n800\nDSF2TEXT\n").unwrap();

        let bin = if Path::new("/usr/bin/false").is_file() { "/usr/bin/false" } else { "/bin/false" };
        let mut tool = DsfTool::new(bin);
        match tool.compile(&text, &dir.path().join("dsf.txt.dsf")) {
            Err(SceneryError::Compiler(msg)) => assert!(msg.contains("exited with")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
