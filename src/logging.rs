use tracing_subscriber::EnvFilter;

use crate::args::LogLevel;

/// 命令行级别对应的过滤指令，第三方 crate 默认只输出 warn 以上
pub fn filter_directives(level: LogLevel) -> String {
    let lvl = level.as_directive();
    match level {
        LogLevel::Error => "error".to_string(),
        _ => format!("warn,rag_chat_webui={lvl},tower_http={lvl}"),
    }
}

/// 初始化日志，`RUST_LOG` 优先于命令行级别
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    // 重复初始化 (例如测试中) 时忽略
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
