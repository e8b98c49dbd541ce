//! Prism 工具集
//!
//! 目前只提供日志初始化，供命令行工具和上层应用共享同一套输出格式。

pub mod init_log;
