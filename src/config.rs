//! Recognised configuration keys (spec Section 6).
//!
//! The teacher repo's property parsing lives in its excluded CLI/glue
//! layer, so this is a small typed struct built directly from a
//! `HashMap<String, String>` rather than a dedicated config crate.

use std::collections::HashMap;
use std::path::PathBuf;

pub const MAX_CONTROL_FILES: usize = 3;
pub const MAX_GROUPS: usize = 3;
pub const MAX_FILES_PER_GROUP: usize = 8;

#[derive(Debug, Clone)]
pub struct LogGroupConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `log.ctl.<i>`
    pub control_files: Vec<PathBuf>,
    /// `log.groups.<i>.path`
    pub groups: Vec<LogGroupConfig>,
    /// `log.group.files`
    pub files_per_group: usize,
    /// `log.file.size`
    pub file_size: u64,
    /// `log.buffer.size`
    pub buffer_size: usize,
    /// `log.buffer.limit`
    pub buffer_limit: usize,
    /// `log.flush.interval`, seconds
    pub flush_interval_secs: u64,
    /// `log.archive.path`
    pub archive_path: PathBuf,
    /// `storage.basePath`
    pub storage_base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_files: vec![PathBuf::from("ctl.a")],
            groups: vec![LogGroupConfig {
                path: PathBuf::from("log"),
            }],
            files_per_group: 3,
            file_size: 1024 * 1024,
            buffer_size: 32 * 1024,
            buffer_limit: 16,
            flush_interval_secs: 5,
            archive_path: PathBuf::from("archive"),
            storage_base_path: PathBuf::from("data"),
        }
    }
}

impl Config {
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let mut cfg = Config::default();

        let mut control_files: Vec<(usize, PathBuf)> = Vec::new();
        let mut groups: Vec<(usize, PathBuf)> = Vec::new();

        for (key, value) in props {
            if let Some(idx) = key.strip_prefix("log.ctl.") {
                if let Ok(i) = idx.parse::<usize>() {
                    if i < MAX_CONTROL_FILES {
                        control_files.push((i, PathBuf::from(value)));
                    }
                }
            } else if let Some(rest) = key.strip_prefix("log.groups.") {
                if let Some(idx) = rest.strip_suffix(".path") {
                    if let Ok(i) = idx.parse::<usize>() {
                        if i < MAX_GROUPS {
                            groups.push((i, PathBuf::from(value)));
                        }
                    }
                }
            } else if key == "log.group.files" {
                if let Ok(v) = value.parse::<usize>() {
                    cfg.files_per_group = v.min(MAX_FILES_PER_GROUP);
                }
            } else if key == "log.file.size" {
                if let Ok(v) = value.parse::<u64>() {
                    cfg.file_size = v;
                }
            } else if key == "log.buffer.size" {
                if let Ok(v) = value.parse::<usize>() {
                    cfg.buffer_size = v;
                }
            } else if key == "log.buffer.limit" {
                if let Ok(v) = value.parse::<usize>() {
                    cfg.buffer_limit = v;
                }
            } else if key == "log.flush.interval" {
                if let Ok(v) = value.parse::<u64>() {
                    cfg.flush_interval_secs = v;
                }
            } else if key == "log.archive.path" {
                cfg.archive_path = PathBuf::from(value);
            } else if key == "storage.basePath" {
                cfg.storage_base_path = PathBuf::from(value);
            }
        }

        if !control_files.is_empty() {
            control_files.sort_by_key(|(i, _)| *i);
            cfg.control_files = control_files.into_iter().map(|(_, p)| p).collect();
        }
        if !groups.is_empty() {
            groups.sort_by_key(|(i, _)| *i);
            cfg.groups = groups
                .into_iter()
                .map(|(_, path)| LogGroupConfig { path })
                .collect();
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognised_keys() {
        let mut props = HashMap::new();
        props.insert("log.ctl.0".to_string(), "/tmp/a.ctl".to_string());
        props.insert("log.ctl.1".to_string(), "/tmp/b.ctl".to_string());
        props.insert("log.group.files".to_string(), "4".to_string());
        props.insert("log.file.size".to_string(), "8192".to_string());
        props.insert("log.buffer.limit".to_string(), "64".to_string());

        let cfg = Config::from_properties(&props);
        assert_eq!(cfg.control_files.len(), 2);
        assert_eq!(cfg.files_per_group, 4);
        assert_eq!(cfg.file_size, 8192);
        assert_eq!(cfg.buffer_limit, 64);
    }

    #[test]
    fn caps_are_enforced() {
        let mut props = HashMap::new();
        props.insert("log.group.files".to_string(), "99".to_string());
        let cfg = Config::from_properties(&props);
        assert_eq!(cfg.files_per_group, MAX_FILES_PER_GROUP);
    }
}
