use std::cell::OnceCell;
use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style(silent: bool) -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty()),
        silent,
    )
}

pub(crate) fn resolve_output_style(
    stdout_is_tty: bool,
    no_color: bool,
    silent: bool,
) -> OutputStyle {
    if stdout_is_tty && !no_color && !silent {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

fn badge_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "err" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new().fg_color(Some(color.into())).effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", self.paint(status, message));
    }

    pub(crate) fn print_error_lines(self, lines: &[(&'static str, String)]) {
        for (status, message) in lines {
            eprintln!("{}", self.paint(status, message));
        }
    }

    pub(crate) fn print_lines(self, lines: &[(&'static str, String)]) {
        for (status, message) in lines {
            self.print_status(status, message);
        }
    }

    fn paint(self, status: &str, message: &str) -> String {
        let line = render_status_line(self.style, status, message);
        match self.style {
            OutputStyle::Plain => line,
            OutputStyle::Rich => {
                let badge = status_badge(status);
                match line.strip_prefix(badge) {
                    Some(rest) => format!("{}{rest}", colorize(badge_style(status), badge)),
                    None => line,
                }
            }
        }
    }

    pub(crate) fn download_progress(self) -> DownloadProgress {
        DownloadProgress {
            style: self.style,
            bar: OnceCell::new(),
        }
    }
}

pub(crate) struct DownloadProgress {
    style: OutputStyle,
    bar: OnceCell<ProgressBar>,
}

impl DownloadProgress {
    pub(crate) fn update(&self, downloaded: u64, total: Option<u64>) {
        if self.style == OutputStyle::Plain {
            return;
        }

        let bar = self.bar.get_or_init(|| {
            let bar = ProgressBar::no_length();
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<10} [{bar:24.cyan/blue}] {bytes:>10}/{total_bytes:10} {elapsed_precise}",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar.set_message("download");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        if let Some(total) = total {
            bar.set_length(total.max(1));
        }
        bar.set_position(downloaded);
    }

    pub(crate) fn finish(&self) {
        if let Some(bar) = self.bar.get() {
            bar.finish_and_clear();
        }
    }
}
