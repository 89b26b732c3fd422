use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use dtail_protocol::error::DtailError;

use crate::ast::{LogFormat, OutfileSpec};
use crate::group_set::Row;

const BLOCK_SEPARATOR: &str = "--- --- ---\n";

/// Writes MapReduce result rows to the configured outfile, honoring the
/// truncate-or-append disposition and the `.query` sidecar (spec §4.5).
pub struct OutfileWriter {
    spec: OutfileSpec,
    query_text: String,
    wrote_first_block: bool,
}

impl OutfileWriter {
    #[must_use]
    pub fn new(spec: OutfileSpec, query_text: String) -> Self {
        Self {
            spec,
            query_text,
            wrote_first_block: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.spec.path
    }

    /// Renders `header`/`rows` and writes them to the outfile per the
    /// configured disposition, creating (and never overwriting) the
    /// `.query` sidecar alongside it.
    pub async fn write(&mut self, header: &[String], rows: &[Row], format: LogFormat) -> Result<(), DtailError> {
        let body = render(header, rows, format);
        self.ensure_sidecar().await?;

        if self.spec.append {
            self.append_block(&body).await
        } else {
            self.replace_atomically(&body).await
        }
    }

    async fn ensure_sidecar(&self) -> Result<(), DtailError> {
        let sidecar = sidecar_path(&self.spec.path);
        if tokio::fs::metadata(&sidecar).await.is_ok() {
            return Ok(());
        }
        tokio::fs::write(&sidecar, &self.query_text)
            .await
            .map_err(|source| DtailError::Reader {
                path: sidecar,
                source,
            })
    }

    async fn replace_atomically(&mut self, body: &str) -> Result<(), DtailError> {
        let tmp_path = tmp_path_for(&self.spec.path);
        tokio::fs::write(&tmp_path, body)
            .await
            .map_err(|source| DtailError::Reader {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &self.spec.path)
            .await
            .map_err(|source| DtailError::Reader {
                path: self.spec.path.clone(),
                source,
            })?;
        self.wrote_first_block = true;
        Ok(())
    }

    async fn append_block(&mut self, body: &str) -> Result<(), DtailError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.spec.path)
            .await
            .map_err(|source| DtailError::Reader {
                path: self.spec.path.clone(),
                source,
            })?;

        if self.wrote_first_block {
            file.write_all(BLOCK_SEPARATOR.as_bytes())
                .await
                .map_err(|source| DtailError::Reader {
                    path: self.spec.path.clone(),
                    source,
                })?;
        }
        file.write_all(body.as_bytes())
            .await
            .map_err(|source| DtailError::Reader {
                path: self.spec.path.clone(),
                source,
            })?;
        self.wrote_first_block = true;
        Ok(())
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".query");
    PathBuf::from(os)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

fn render(header: &[String], rows: &[Row], format: LogFormat) -> String {
    let delimiter = match format {
        LogFormat::Default => " | ",
        LogFormat::Csv => ",",
    };
    let mut out = String::new();
    out.push_str(&header.join(delimiter));
    out.push('\n');
    for row in rows {
        out.push_str(&row.values.join(delimiter));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Row {
        Row {
            key: vec![],
            values: values.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn truncate_mode_replaces_content_and_writes_sidecar_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut writer = OutfileWriter::new(
            OutfileSpec {
                path: path.clone(),
                append: false,
            },
            "select count($line)".to_string(),
        );

        writer
            .write(&["count".into()], &[row(&["1"])], LogFormat::Default)
            .await
            .unwrap();
        writer
            .write(&["count".into()], &[row(&["2"])], LogFormat::Default)
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains('2'));
        assert!(!content.contains(&"1\n".to_string()) || content.matches('1').count() <= 1);

        let sidecar = tokio::fs::read_to_string(sidecar_path(&path)).await.unwrap();
        assert_eq!(sidecar, "select count($line)");
    }

    #[tokio::test]
    async fn append_mode_concatenates_blocks_with_separator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out_append.txt");
        let mut writer = OutfileWriter::new(
            OutfileSpec {
                path: path.clone(),
                append: true,
            },
            "select count($line)".to_string(),
        );

        writer
            .write(&["count".into()], &[row(&["1"])], LogFormat::Default)
            .await
            .unwrap();
        writer
            .write(&["count".into()], &[row(&["2"])], LogFormat::Default)
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.contains("1"));
        assert!(content.contains("2"));
        assert!(content.contains(BLOCK_SEPARATOR.trim_end()));
    }

    #[tokio::test]
    async fn sidecar_is_never_rewritten_once_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out2.txt");
        let mut writer = OutfileWriter::new(
            OutfileSpec {
                path: path.clone(),
                append: false,
            },
            "select count($line)".to_string(),
        );
        writer
            .write(&["count".into()], &[row(&["1"])], LogFormat::Default)
            .await
            .unwrap();

        tokio::fs::write(sidecar_path(&path), "select count($line)")
            .await
            .unwrap();
        let mut second_writer = OutfileWriter::new(
            OutfileSpec {
                path: path.clone(),
                append: false,
            },
            "select sum($x)".to_string(),
        );
        second_writer
            .write(&["sum".into()], &[row(&["9"])], LogFormat::Default)
            .await
            .unwrap();

        let sidecar = tokio::fs::read_to_string(sidecar_path(&path)).await.unwrap();
        assert_eq!(sidecar, "select count($line)");
    }
}
