use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    port: u16,
    /// 0 表示使用 CPU 核心数
    #[serde(default)]
    worker_threads: usize,
    /// 只监听本地回环地址
    #[serde(default = "default_local")]
    local: bool,
    /// 应用挂载点，只有该路径下的请求会交给应用处理
    #[serde(default = "default_base_path")]
    base_path: String,
    /// 开发模式：应用故障时渲染错误页并重启应用
    #[serde(default = "default_development")]
    development: bool,
    /// 让应用的每次请求处理都抛出故障，用于演示重启流程
    #[serde(default)]
    raise_test_error: bool,
    #[serde(default = "default_max_request_size")]
    max_request_size: usize,
}

fn default_port() -> u16 {
    7878
}

fn default_local() -> bool {
    true
}

fn default_base_path() -> String {
    "/app".to_string()
}

fn default_development() -> bool {
    true
}

fn default_max_request_size() -> usize {
    65536 // 64KB
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: default_port(),
            worker_threads: 0,
            local: default_local(),
            base_path: default_base_path(),
            development: default_development(),
            raise_test_error: false,
            max_request_size: default_max_request_size(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => {
                warn!("无法打开配置文件{}：{}", filename, e);
                return Err(Exception::ConfigNotFound(filename.to_string()));
            }
        };
        let mut str_val = String::new();
        if let Err(e) = file.read_to_string(&mut str_val) {
            return Err(Exception::ConfigInvalid(e.to_string()));
        }

        let mut raw_config: Config = match toml::from_str(&str_val) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.max_request_size == 0 {
            warn!("max_request_size被设置为0，将使用默认值。");
            raw_config.max_request_size = default_max_request_size();
        }
        Ok(raw_config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn development(&self) -> bool {
        self.development
    }

    pub fn raise_test_error(&self) -> bool {
        self.raise_test_error
    }

    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::new();
        assert_eq!(config.port(), 7878);
        assert_eq!(config.base_path(), "/app");
        assert!(config.development());
        assert!(!config.raise_test_error());
    }

    #[test]
    fn test_from_toml_minimal() {
        let file = write_config("port = 8080\nworker_threads = 2\nlocal = false\n");
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.port(), 8080);
        assert_eq!(config.worker_threads(), 2);
        assert!(!config.local());
        assert_eq!(config.base_path(), "/app");
        assert_eq!(config.max_request_size(), 65536);
    }

    #[test]
    fn test_from_toml_full() {
        let file = write_config(
            r#"
            port = 9000
            worker_threads = 0
            local = true
            base_path = "/demo"
            development = false
            raise_test_error = true
            max_request_size = 1024
            "#,
        );
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();

        assert!(config.worker_threads() > 0);
        assert_eq!(config.base_path(), "/demo");
        assert!(!config.development());
        assert!(config.raise_test_error());
        assert_eq!(config.max_request_size(), 1024);
    }

    #[test]
    fn test_from_toml_partial_keeps_defaults() {
        let file = write_config("base_path = \"/demo\"\n");
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.base_path(), "/demo");
        assert_eq!(config.port(), 7878);
        assert!(config.local());
        assert!(config.worker_threads() > 0);
        assert!(config.development());
    }

    #[test]
    fn test_from_toml_invalid_falls_back() {
        let file = write_config("port = \"not a number\"");
        let config = Config::from_toml(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.port(), 7878);
    }

    #[test]
    fn test_from_toml_missing_file() {
        let result = Config::from_toml("/nonexistent/development.toml");
        assert!(matches!(result, Err(Exception::ConfigNotFound(_))));
    }
}
