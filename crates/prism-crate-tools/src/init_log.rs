use std::io::Write;

use anstyle::{AnsiColor, Color, RgbColor, Style};

/// 未设置 `RUST_LOG` 时使用的日志级别
const DEFAULT_LEVEL: log::LevelFilter = log::LevelFilter::Info;

fn level_color(level: log::Level) -> Option<Color> {
    match level {
        log::Level::Error => Some(Color::Ansi(AnsiColor::Red)),
        log::Level::Warn => Some(Color::Ansi(AnsiColor::Yellow)),
        log::Level::Info => Some(Color::Ansi(AnsiColor::Green)),
        log::Level::Debug => Some(Color::Ansi(AnsiColor::Cyan)),
        log::Level::Trace => None,
    }
}

/// 初始化全局 logger
///
/// 默认 Info 级别，可以通过 `RUST_LOG` 覆盖（例如 `RUST_LOG=prism_shader=debug`
/// 可以看到每个 uniform 的反射细节）。重复调用是安全的。
pub fn init_log() {
    let _ = env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).fg_color(level_color(record.level()));
            let grey_style = Style::new().fg_color(Some(Color::Rgb(RgbColor(110, 110, 110))));
            let text_style = Style::new().fg_color(Some(Color::Rgb(RgbColor(75, 75, 75))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['/', '\\']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();

            writeln!(
                buf,
                "{level_style}[{time}] {level}{level_style:#} {grey_style}[{file}:{line}]{grey_style:#} \
                 {text_style}{}{text_style:#}",
                record.args()
            )
        })
        .filter(None, DEFAULT_LEVEL)
        .parse_env("RUST_LOG")
        .try_init();
}
