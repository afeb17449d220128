//! Thin wrappers around the external programs the pipeline depends on:
//! version control, `detex` for word counts and `pdfinfo` for page counts.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::ToolsConfig;
use crate::error::{MeterError, Result};

pub struct Toolbox {
    config: ToolsConfig,
    pages_regex: Regex,
}

impl Toolbox {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            config: config.clone(),
            pages_regex: Regex::new(r"Pages:\s*(\d+)").expect("Invalid page count regex"),
        }
    }

    /// Pull the latest revision into `dir`
    pub async fn sync(&self, dir: &Path) -> Result<()> {
        info!("Pulling latest changes in {}", dir.display());
        let output = Command::new(&self.config.git)
            .arg("pull")
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MeterError::Sync(format!("{} pull could not start: {}", self.config.git, e)))?;

        if !output.status.success() {
            return Err(MeterError::Sync(format!(
                "{} pull exited with {}: {}",
                self.config.git,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!("{}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    }

    /// Words in the plain-text rendering of `document`.
    ///
    /// `detex` is run from `work_dir`, the document's own directory, so that
    /// it follows `\input` directives the same way the compiler does.
    pub async fn word_count(&self, document: &Path, work_dir: &Path) -> Result<u64> {
        let stdout = self.capture(&self.config.detex, document, work_dir).await?;
        let words = stdout.split_whitespace().count() as u64;
        debug!("{} words in {}", words, document.display());
        Ok(words)
    }

    /// Page count reported by `pdfinfo` for `pdf`
    pub async fn page_count(&self, pdf: &Path) -> Result<u64> {
        let work_dir = pdf.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let target = pdf.file_name().map(Path::new).unwrap_or(pdf);
        let stdout = self.capture(&self.config.pdfinfo, target, work_dir).await?;
        self.parse_page_count(&stdout)
    }

    /// Extract the integer following `Pages:` in `pdfinfo` output
    pub fn parse_page_count(&self, output: &str) -> Result<u64> {
        output
            .lines()
            .filter(|line| line.contains("Pages:"))
            .filter_map(|line| self.pages_regex.captures(line))
            .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
            .last()
            .ok_or_else(|| MeterError::ToolOutput {
                tool: self.config.pdfinfo.clone(),
                output: output.to_string(),
            })
    }

    /// Word counts per chapter directory.
    ///
    /// A chapter is an immediate sub-directory of `project_dir`; its main
    /// files are the `.tex` files whose name contains `00`. Chapters without
    /// any words are left out.
    pub async fn chapter_word_counts(&self, project_dir: &Path) -> Result<BTreeMap<String, u64>> {
        let mut chapters = BTreeMap::new();

        for entry in WalkDir::new(project_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| MeterError::Io(e.into()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let chapter = entry.file_name().to_string_lossy().to_string();

            let mut words = 0;
            for file in WalkDir::new(entry.path()).min_depth(1).max_depth(1).sort_by_file_name() {
                let file = file.map_err(|e| MeterError::Io(e.into()))?;
                let name = file.file_name().to_string_lossy();
                if file.file_type().is_file() && name.ends_with(".tex") && name.contains("00") {
                    words += self.word_count(file.path(), project_dir).await?;
                }
            }

            if words > 0 {
                chapters.insert(chapter, words);
            }
        }

        Ok(chapters)
    }

    async fn capture(&self, tool: &str, target: &Path, work_dir: &Path) -> Result<String> {
        let output = Command::new(tool)
            .arg(target)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MeterError::Tool {
                tool: tool.to_string(),
                message: format!("failed to start: {}", e),
            })?;

        if !output.status.success() {
            return Err(MeterError::Tool {
                tool: tool.to_string(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    /// `cat` stands in for both detex and pdfinfo
    fn toolbox() -> Toolbox {
        let mut tools = Config::default().tools;
        tools.detex = "cat".to_string();
        tools.pdfinfo = "cat".to_string();
        Toolbox::new(&tools)
    }

    const PDFINFO: &str = "Title:          thesis\nCreator:        LaTeX\nPages:          142\nEncrypted:      no\n";

    #[test]
    fn test_parse_page_count() {
        assert_eq!(toolbox().parse_page_count(PDFINFO).unwrap(), 142);
    }

    #[test]
    fn test_missing_pages_line_keeps_raw_output() {
        let err = toolbox().parse_page_count("Title: x\n").unwrap_err();
        match err {
            MeterError::ToolOutput { output, .. } => assert_eq!(output, "Title: x\n"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_page_count_runs_tool() {
        let dir = TempDir::new().unwrap();
        dir.child("main.pdf").write_str(PDFINFO).unwrap();
        let pages = toolbox().page_count(&dir.path().join("main.pdf")).await.unwrap();
        assert_eq!(pages, 142);
    }

    #[tokio::test]
    async fn test_word_count_counts_whitespace_separated_words() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex").write_str("one two\nthree\t four\n").unwrap();
        let words = toolbox()
            .word_count(Path::new("main.tex"), dir.path())
            .await
            .unwrap();
        assert_eq!(words, 4);
    }

    #[tokio::test]
    async fn test_failing_tool_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = toolbox()
            .word_count(Path::new("absent.tex"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MeterError::Tool { .. }));
    }

    #[tokio::test]
    async fn test_chapter_word_counts() {
        let dir = TempDir::new().unwrap();
        dir.child("01-intro/00-intro.tex").write_str("a b c").unwrap();
        dir.child("01-intro/01-background.tex").write_str("ignored words here").unwrap();
        dir.child("02-method/00-method.tex").write_str("d e").unwrap();
        dir.child("02-method/00-extra.tex").write_str("f").unwrap();
        dir.child("03-empty/00-empty.tex").write_str("").unwrap();
        dir.child("00-main.tex").write_str("top level").unwrap();

        let chapters = toolbox().chapter_word_counts(dir.path()).await.unwrap();

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters["01-intro"], 3);
        assert_eq!(chapters["02-method"], 3);
    }

    #[tokio::test]
    async fn test_failed_pull_is_sync_error() {
        let dir = TempDir::new().unwrap();
        let mut tools = Config::default().tools;
        tools.git = "false".to_string();
        let err = Toolbox::new(&tools).sync(dir.path()).await.unwrap_err();
        assert!(matches!(err, MeterError::Sync(_)));
    }
}
