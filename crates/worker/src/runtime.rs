//! Boundary with the invocation runtime: read the job envelope, emit the
//! result.

use std::io::{Read, Write};
use std::path::PathBuf;

use bridge_core::job::{Job, JobResult};

/// Reads from stdin instead of a file.
pub const STDIN_PATH: &str = "-";

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Failed to read job envelope from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job envelope is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load the job envelope `{ "id": ..., "input": ... }` from `path`.
pub async fn read_job(path: &str) -> Result<Job, EnvelopeError> {
    let raw = if path == STDIN_PATH {
        tokio::task::spawn_blocking(|| {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map(|_| buf)
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|read| read)
        .map_err(|source| EnvelopeError::Read {
            path: PathBuf::from("<stdin>"),
            source,
        })?
    } else {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| EnvelopeError::Read {
                path: PathBuf::from(path),
                source,
            })?
    };

    parse_job(&raw)
}

pub fn parse_job(raw: &str) -> Result<Job, EnvelopeError> {
    Ok(serde_json::from_str(raw)?)
}

/// Write `result` as a single JSON line.
pub fn write_result(mut out: impl Write, result: &JobResult) -> std::io::Result<()> {
    serde_json::to_writer(&mut out, result)?;
    out.write_all(b"\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use bridge_core::job::DEFAULT_JOB_ID;

    use super::*;

    #[test]
    fn envelope_without_id_gets_default() {
        let job = parse_job(r#"{ "input": { "workflow": {} } }"#).unwrap();
        assert_eq!(job.id, DEFAULT_JOB_ID);
        assert!(job.input.is_some());
    }

    #[test]
    fn garbage_envelope_is_rejected() {
        assert_matches!(parse_job("not json"), Err(EnvelopeError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = read_job("/definitely/not/here.json").await.unwrap_err();
        assert_matches!(err, EnvelopeError::Read { .. });
    }

    #[test]
    fn result_is_one_line() {
        let mut images = BTreeMap::new();
        images.insert("out.png".to_string(), "aGk=".to_string());
        let result = JobResult::success("Workflow completed with 1 image(s)", images, vec![], false);

        let mut buf = Vec::new();
        write_result(&mut buf, &result).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert_eq!(text.matches('\n').count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed["status"], "success");
        assert_eq!(parsed["output_images"]["out.png"], "aGk=");
        assert_eq!(parsed["refresh_worker"], false);
        assert!(parsed.get("details").is_none());
    }
}
