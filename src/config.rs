//! Runtime configuration for a sparrow process.
//!
//! All values have workable defaults. Override via environment variables
//! (prefixed `SPARROW_`), a `key value` config file, or by constructing a
//! custom `SparrowConfig`.

use crate::error::{Result, SparrowError};
use std::io::BufRead;
use std::path::Path;

/// Tuning parameters consumed by the parameter-server core.
#[derive(Debug, Clone)]
pub struct SparrowConfig {
    /// Number of independently locked shards per sparse table.
    ///
    /// Fixed for the process lifetime; trades lock contention against
    /// memory overhead.
    pub shard_num: usize,

    /// Threads serving requests on a server role's endpoint.
    pub server_service_threads: usize,

    /// Threads serving requests on a worker role's endpoint.
    pub worker_service_threads: usize,

    /// Threads in the worker's compute pool (mini-batch gather/train).
    pub async_threads: usize,

    /// When true, a process hosts either a server or a worker role, never
    /// both; the first `server_num` ranks become servers.
    pub split_roles: bool,

    /// Number of server roles when `split_roles` is set. Ignored (every
    /// rank hosts both roles) otherwise.
    pub server_num: usize,

    /// Host the serving endpoints bind to.
    pub listen_host: String,

    /// Lines claimed per mini-batch by the batch reader.
    pub minibatch: usize,

    /// AdaGrad step size.
    pub learning_rate: f32,

    /// Numerical-stability constant added to the squared-gradient
    /// accumulator before the square root.
    pub fudge_factor: f32,

    /// Dense parameter dimension for the provided access method.
    pub len_vec: usize,
}

impl Default for SparrowConfig {
    fn default() -> Self {
        Self {
            shard_num: 8,
            server_service_threads: 2,
            worker_service_threads: 2,
            async_threads: 2,
            split_roles: false,
            server_num: 1,
            listen_host: "127.0.0.1".into(),
            minibatch: 1000,
            learning_rate: 0.1,
            fudge_factor: 1e-6,
            len_vec: 16,
        }
    }
}

impl SparrowConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `SPARROW_SHARD_NUM`
    /// - `SPARROW_SERVER_SERVICE_THREADS`
    /// - `SPARROW_WORKER_SERVICE_THREADS`
    /// - `SPARROW_ASYNC_THREADS`
    /// - `SPARROW_SPLIT_ROLES`
    /// - `SPARROW_SERVER_NUM`
    /// - `SPARROW_LISTEN_HOST`
    /// - `SPARROW_MINIBATCH`
    /// - `SPARROW_LEARNING_RATE`
    /// - `SPARROW_FUDGE_FACTOR`
    /// - `SPARROW_LEN_VEC`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SPARROW_SHARD_NUM") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.shard_num = n;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_SERVER_SERVICE_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.server_service_threads = n;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_WORKER_SERVICE_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.worker_service_threads = n;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_ASYNC_THREADS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.async_threads = n;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_SPLIT_ROLES") {
            cfg.split_roles = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SPARROW_SERVER_NUM") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.server_num = n;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_LISTEN_HOST") {
            cfg.listen_host = v;
        }
        if let Ok(v) = std::env::var("SPARROW_MINIBATCH") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.minibatch = n;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_LEARNING_RATE") {
            if let Ok(f) = v.parse::<f32>() {
                cfg.learning_rate = f;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_FUDGE_FACTOR") {
            if let Ok(f) = v.parse::<f32>() {
                cfg.fudge_factor = f;
            }
        }
        if let Ok(v) = std::env::var("SPARROW_LEN_VEC") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.len_vec = n;
            }
        }

        cfg
    }

    /// Load config from a `key value` file.
    ///
    /// One setting per line; `#` starts a comment; blank lines are
    /// ignored. Keys match the lowercase env-variable suffixes
    /// (`shard_num`, `async_threads`, ...). Unknown keys are an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut cfg = Self::default();

        for (idx, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let lineno = idx + 1;
            let (key, value) = line.split_once(char::is_whitespace).ok_or_else(|| {
                SparrowError::ConfigParse {
                    line: lineno,
                    reason: format!("expected `key value`, got `{line}`"),
                }
            })?;
            let value = value.trim();
            cfg.apply(key, value).map_err(|reason| SparrowError::ConfigParse {
                line: lineno,
                reason,
            })?;
        }

        Ok(cfg)
    }

    fn apply(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, String> {
            value
                .parse::<T>()
                .map_err(|_| format!("bad value `{value}` for `{key}`"))
        }

        match key {
            "shard_num" => self.shard_num = parse(key, value)?,
            "server_service_threads" => self.server_service_threads = parse(key, value)?,
            "worker_service_threads" => self.worker_service_threads = parse(key, value)?,
            "async_threads" => self.async_threads = parse(key, value)?,
            "split_roles" => self.split_roles = value == "1" || value.eq_ignore_ascii_case("true"),
            "server_num" => self.server_num = parse(key, value)?,
            "listen_host" => self.listen_host = value.to_string(),
            "minibatch" => self.minibatch = parse(key, value)?,
            "learning_rate" => self.learning_rate = parse(key, value)?,
            "fudge_factor" => self.fudge_factor = parse(key, value)?,
            "len_vec" => self.len_vec = parse(key, value)?,
            other => return Err(format!("unknown config key `{other}`")),
        }
        Ok(())
    }

    /// Reject settings that represent deployment errors rather than
    /// tunable choices. Counts must all be positive.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &'static str, value: usize) -> Result<()> {
            if value == 0 {
                return Err(SparrowError::InvalidConfig { name, value: 0 });
            }
            Ok(())
        }

        positive("shard_num", self.shard_num)?;
        positive("server_service_threads", self.server_service_threads)?;
        positive("worker_service_threads", self.worker_service_threads)?;
        positive("async_threads", self.async_threads)?;
        positive("server_num", self.server_num)?;
        positive("minibatch", self.minibatch)?;
        positive("len_vec", self.len_vec)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        assert!(SparrowConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_shard_num_rejected() {
        let cfg = SparrowConfig {
            shard_num: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(SparrowError::InvalidConfig {
                name: "shard_num",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_thread_count_rejected() {
        let cfg = SparrowConfig {
            async_threads: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# cluster layout").unwrap();
        writeln!(f, "shard_num 32").unwrap();
        writeln!(f, "split_roles true").unwrap();
        writeln!(f, "server_num 2").unwrap();
        writeln!(f, "learning_rate 0.05  # step size").unwrap();
        writeln!(f).unwrap();
        f.flush().unwrap();

        let cfg = SparrowConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.shard_num, 32);
        assert!(cfg.split_roles);
        assert_eq!(cfg.server_num, 2);
        assert!((cfg.learning_rate - 0.05).abs() < 1e-6);
        // Unset keys keep their defaults.
        assert_eq!(cfg.minibatch, SparrowConfig::default().minibatch);
    }

    #[test]
    fn test_from_file_unknown_key() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "no_such_knob 3").unwrap();
        f.flush().unwrap();

        assert!(matches!(
            SparrowConfig::from_file(f.path()),
            Err(SparrowError::ConfigParse { line: 1, .. })
        ));
    }

    #[test]
    fn test_from_file_missing_value() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "shard_num").unwrap();
        f.flush().unwrap();

        assert!(SparrowConfig::from_file(f.path()).is_err());
    }
}
