use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bridge_comfyui::readiness::{ReadinessConfig, DEFAULT_READY_MARKER};

/// How explicit `images` from the job input reach ComfyUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputStaging {
    /// Write decoded files straight into `input_dir`.
    #[default]
    Filesystem,
    /// Send them through ComfyUI's `POST /upload/image`.
    Upload,
}

/// What to do when history references an output file that is not on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMissingPolicy {
    /// Record the miss and keep resolving the remaining images.
    #[default]
    PerImage,
    /// Abort the job on the first miss.
    FailJob,
}

/// Completion poller parameters.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            max_retries: 500,
        }
    }
}

/// S3-compatible bucket used for durable output storage.
#[derive(Clone)]
pub struct BucketConfig {
    pub endpoint_url: String,
    /// `None` when neither `BUCKET_NAME` nor the endpoint host names a
    /// bucket; uploads then fail per image.
    pub name: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Lifetime of the presigned download URL returned for each image.
    pub url_expiry: Duration,
    pub force_path_style: bool,
}

impl fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("name", &self.name)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "<set>"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<set>"))
            .field("url_expiry", &self.url_expiry)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Worker configuration, read once at process start.
///
/// Built from environment variables by [`WorkerConfig::from_env`] and
/// passed by reference to every component. Tests build it directly.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `host:port` of the local ComfyUI server.
    pub comfy_host: String,
    pub readiness: ReadinessConfig,
    pub polling: PollingConfig,
    /// Timeout for submission, history and upload requests.
    pub request_timeout: Duration,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub input_staging: InputStaging,
    pub output_missing: OutputMissingPolicy,
    /// Ask the invocation runtime to replace this worker after the job.
    pub refresh_worker: bool,
    /// Present when outputs should be uploaded instead of inlined.
    pub bucket: Option<BucketConfig>,
    /// Where the binary reads the job envelope from; `-` means stdin.
    pub job_input_path: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            comfy_host: "127.0.0.1:8188".into(),
            readiness: ReadinessConfig::default(),
            polling: PollingConfig::default(),
            request_timeout: Duration::from_secs(30),
            input_dir: PathBuf::from("/comfyui/input"),
            output_dir: PathBuf::from("/comfyui/output"),
            temp_dir: PathBuf::from("/comfyui/temp"),
            input_staging: InputStaging::default(),
            output_missing: OutputMissingPolicy::default(),
            refresh_worker: false,
            bucket: None,
            job_input_path: "test_input.json".into(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default           |
    /// |-----------------------------------|-------------------|
    /// | `COMFY_HOST`                      | `127.0.0.1:8188`  |
    /// | `COMFY_API_READY_TIMEOUT`         | `60` (seconds)    |
    /// | `COMFY_API_AVAILABLE_INTERVAL_MS` | `50`              |
    /// | `COMFY_READY_MARKER`              | `VAELoader`       |
    /// | `COMFY_POLLING_INTERVAL_MS`       | `250`             |
    /// | `COMFY_POLLING_MAX_RETRIES`       | `500`             |
    /// | `COMFY_REQUEST_TIMEOUT_SECS`      | `30`              |
    /// | `COMFY_INPUT_PATH`                | `/comfyui/input`  |
    /// | `COMFY_OUTPUT_PATH`               | `/comfyui/output` |
    /// | `COMFY_TEMP_PATH`                 | `/comfyui/temp`   |
    /// | `COMFY_INPUT_STAGING`             | `filesystem`      |
    /// | `OUTPUT_MISSING_POLICY`           | `per_image`       |
    /// | `REFRESH_WORKER`                  | `false`           |
    /// | `BUCKET_ENDPOINT_URL`             | unset             |
    /// | `JOB_INPUT_PATH`                  | `test_input.json` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading values through
    /// `lookup`, so callers can supply a fixed map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let readiness = ReadinessConfig {
            timeout: Duration::from_secs(parse_or(
                &get,
                "COMFY_API_READY_TIMEOUT",
                defaults.readiness.timeout.as_secs(),
            )),
            interval: Duration::from_millis(parse_or(
                &get,
                "COMFY_API_AVAILABLE_INTERVAL_MS",
                50,
            )),
            marker_node: get("COMFY_READY_MARKER").unwrap_or_else(|| DEFAULT_READY_MARKER.into()),
        };

        let polling = PollingConfig {
            interval: Duration::from_millis(parse_or(&get, "COMFY_POLLING_INTERVAL_MS", 250)),
            max_retries: parse_or(&get, "COMFY_POLLING_MAX_RETRIES", defaults.polling.max_retries),
        };

        let input_staging = match get("COMFY_INPUT_STAGING").as_deref() {
            None => defaults.input_staging,
            Some(v) if v.eq_ignore_ascii_case("upload") => InputStaging::Upload,
            Some(v) if v.eq_ignore_ascii_case("filesystem") => InputStaging::Filesystem,
            Some(other) => {
                tracing::warn!(value = %other, "Unknown COMFY_INPUT_STAGING, using filesystem");
                InputStaging::Filesystem
            }
        };

        let output_missing = match get("OUTPUT_MISSING_POLICY").as_deref() {
            None => defaults.output_missing,
            Some(v) if v.eq_ignore_ascii_case("fail_job") => OutputMissingPolicy::FailJob,
            Some(v) if v.eq_ignore_ascii_case("per_image") => OutputMissingPolicy::PerImage,
            Some(other) => {
                tracing::warn!(value = %other, "Unknown OUTPUT_MISSING_POLICY, using per_image");
                OutputMissingPolicy::PerImage
            }
        };

        Self {
            comfy_host: get("COMFY_HOST").unwrap_or(defaults.comfy_host),
            readiness,
            polling,
            request_timeout: Duration::from_secs(parse_or(&get, "COMFY_REQUEST_TIMEOUT_SECS", 30)),
            input_dir: get("COMFY_INPUT_PATH").map(PathBuf::from).unwrap_or(defaults.input_dir),
            output_dir: get("COMFY_OUTPUT_PATH").map(PathBuf::from).unwrap_or(defaults.output_dir),
            temp_dir: get("COMFY_TEMP_PATH").map(PathBuf::from).unwrap_or(defaults.temp_dir),
            input_staging,
            output_missing,
            refresh_worker: get("REFRESH_WORKER").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            bucket: bucket_from_lookup(&get),
            job_input_path: get("JOB_INPUT_PATH").unwrap_or(defaults.job_input_path),
        }
    }

    /// Base HTTP URL of the ComfyUI server.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.comfy_host)
    }
}

fn bucket_from_lookup(get: &impl Fn(&str) -> Option<String>) -> Option<BucketConfig> {
    let endpoint_url = get("BUCKET_ENDPOINT_URL")?;

    let name = get("BUCKET_NAME").or_else(|| bucket_name_from_endpoint(&endpoint_url));
    if name.is_none() {
        tracing::warn!(
            endpoint = %endpoint_url,
            "BUCKET_ENDPOINT_URL is set but no bucket name could be determined, set BUCKET_NAME",
        );
    }

    Some(BucketConfig {
        name,
        region: get("BUCKET_REGION").unwrap_or_else(|| "us-east-1".into()),
        access_key_id: get("BUCKET_ACCESS_KEY_ID"),
        secret_access_key: get("BUCKET_SECRET_ACCESS_KEY"),
        url_expiry: Duration::from_secs(parse_or(get, "BUCKET_URL_EXPIRY_SECS", 604_800)),
        force_path_style: get("BUCKET_FORCE_PATH_STYLE")
            .map_or(true, |v| !v.eq_ignore_ascii_case("false")),
        endpoint_url,
    })
}

/// First DNS label of the endpoint host, e.g. `my-bucket` for
/// `https://my-bucket.s3.us-east-1.amazonaws.com`.
pub fn bucket_name_from_endpoint(endpoint_url: &str) -> Option<String> {
    let without_scheme = endpoint_url
        .split_once("://")
        .map_or(endpoint_url, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', ':'])
        .next()
        .filter(|h| !h.is_empty())?;

    if host.parse::<std::net::IpAddr>().is_ok() || !host.contains('.') {
        return None;
    }

    host.split('.').next().map(str::to_string)
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + fmt::Display,
{
    match get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, %default, "Invalid value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> WorkerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]);

        assert_eq!(config.comfy_host, "127.0.0.1:8188");
        assert_eq!(config.api_url(), "http://127.0.0.1:8188");
        assert_eq!(config.readiness.timeout, Duration::from_secs(60));
        assert_eq!(config.readiness.interval, Duration::from_millis(50));
        assert_eq!(config.polling.interval, Duration::from_millis(250));
        assert_eq!(config.polling.max_retries, 500);
        assert_eq!(config.output_dir, PathBuf::from("/comfyui/output"));
        assert_eq!(config.input_dir, PathBuf::from("/comfyui/input"));
        assert_eq!(config.input_staging, InputStaging::Filesystem);
        assert_eq!(config.output_missing, OutputMissingPolicy::PerImage);
        assert!(!config.refresh_worker);
        assert!(config.bucket.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("COMFY_HOST", "10.0.0.5:9000"),
            ("COMFY_API_READY_TIMEOUT", "5"),
            ("COMFY_POLLING_INTERVAL_MS", "100"),
            ("COMFY_POLLING_MAX_RETRIES", "7"),
            ("COMFY_OUTPUT_PATH", "/tmp/out"),
            ("COMFY_INPUT_STAGING", "upload"),
            ("OUTPUT_MISSING_POLICY", "FAIL_JOB"),
            ("REFRESH_WORKER", "True"),
        ]);

        assert_eq!(config.api_url(), "http://10.0.0.5:9000");
        assert_eq!(config.readiness.timeout, Duration::from_secs(5));
        assert_eq!(config.polling.interval, Duration::from_millis(100));
        assert_eq!(config.polling.max_retries, 7);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.input_staging, InputStaging::Upload);
        assert_eq!(config.output_missing, OutputMissingPolicy::FailJob);
        assert!(config.refresh_worker);
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("COMFY_POLLING_MAX_RETRIES", "lots"),
            ("COMFY_API_READY_TIMEOUT", "-1"),
        ]);
        assert_eq!(config.polling.max_retries, 500);
        assert_eq!(config.readiness.timeout, Duration::from_secs(60));
    }

    #[test]
    fn refresh_worker_requires_literal_true() {
        assert!(!config_from(&[("REFRESH_WORKER", "yes")]).refresh_worker);
        assert!(!config_from(&[("REFRESH_WORKER", "1")]).refresh_worker);
    }

    #[test]
    fn bucket_enabled_by_endpoint() {
        let config = config_from(&[
            ("BUCKET_ENDPOINT_URL", "https://outputs.s3.eu-west-1.amazonaws.com"),
            ("BUCKET_ACCESS_KEY_ID", "AKIA"),
            ("BUCKET_SECRET_ACCESS_KEY", "hunter2-value"),
        ]);
        let bucket = config.bucket.unwrap();

        assert_eq!(bucket.name.as_deref(), Some("outputs"));
        assert_eq!(bucket.region, "us-east-1");
        assert_eq!(bucket.url_expiry, Duration::from_secs(604_800));
        assert!(!format!("{bucket:?}").contains("hunter2-value"));
    }

    #[test]
    fn explicit_bucket_name_wins() {
        let config = config_from(&[
            ("BUCKET_ENDPOINT_URL", "http://minio.local:9000"),
            ("BUCKET_NAME", "renders"),
        ]);
        assert_eq!(config.bucket.unwrap().name.as_deref(), Some("renders"));
    }

    #[test]
    fn dotless_endpoint_keeps_uploads_enabled() {
        let config = config_from(&[("BUCKET_ENDPOINT_URL", "http://minio:9000")]);
        let bucket = config.bucket.unwrap();

        assert_eq!(bucket.endpoint_url, "http://minio:9000");
        assert_eq!(bucket.name, None);
    }

    #[test]
    fn bucket_name_from_endpoint_host() {
        assert_eq!(
            bucket_name_from_endpoint("https://a.b.c/path").as_deref(),
            Some("a")
        );
        assert_eq!(bucket_name_from_endpoint("http://127.0.0.1:9000"), None);
        assert_eq!(bucket_name_from_endpoint("http://localhost:9000"), None);
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = config_from(&[("BUCKET_ENDPOINT_URL", " "), ("COMFY_HOST", "")]);
        assert!(config.bucket.is_none());
        assert_eq!(config.comfy_host, "127.0.0.1:8188");
    }
}
