use log::warn;
use std::{path::PathBuf, str::FromStr};

/// 运行时绑定的配置。
#[derive(Clone, Debug)]
pub struct Config {
    /// 控制库路径。
    pub library: PathBuf,
    /// 新建图时设置的调试等级。
    pub debug_level: i32,
    /// 读取日志与图转储时的缓冲区容量。
    pub log_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library: Self::LIBRARY.into(),
            debug_level: 0,
            log_capacity: 16 << 10,
        }
    }
}

impl Config {
    pub const LIBRARY: &str = "libhexagon_nn_controller.so";

    pub const ENV_LIBRARY: &str = "HEXAGON_NN_LIBRARY";
    pub const ENV_DEBUG_LEVEL: &str = "HEXAGON_NN_DEBUG_LEVEL";
    pub const ENV_LOG_CAPACITY: &str = "HEXAGON_NN_LOG_CAPACITY";

    /// 默认配置叠加进程环境变量。
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// 用 `var` 查到的值覆盖对应字段，无法解析的值被忽略。
    pub fn overlay(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = var(Self::ENV_LIBRARY) {
            self.library = path.into()
        }
        if let Some(level) = parse(&var, Self::ENV_DEBUG_LEVEL) {
            self.debug_level = level
        }
        if let Some(capacity) = parse(&var, Self::ENV_LOG_CAPACITY) {
            self.log_capacity = capacity
        }
        self
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = var(key)?;
    match value.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!("ignore {key}={value:?}");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::Config;
    use std::collections::HashMap;

    #[test]
    fn test() {
        let config = Config::default();
        assert_eq!(config.library.to_str(), Some(Config::LIBRARY));
        assert_eq!(config.debug_level, 0);
        assert_eq!(config.log_capacity, 16 * 1024);

        let env = HashMap::from([
            (Config::ENV_LIBRARY, "/vendor/lib/libhexagon_nn_controller.so"),
            (Config::ENV_DEBUG_LEVEL, " 99 "),
            (Config::ENV_LOG_CAPACITY, "lots"),
        ]);
        let config = Config::default().overlay(|key| env.get(key).map(|s| s.to_string()));
        assert_eq!(
            config.library.to_str(),
            Some("/vendor/lib/libhexagon_nn_controller.so")
        );
        assert_eq!(config.debug_level, 99);
        assert_eq!(config.log_capacity, 16 * 1024);
    }
}
