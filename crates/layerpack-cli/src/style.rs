use std::env;

use color_eyre::owo_colors::OwoColorize;
use layerpack_core::CommandStatus;

pub struct Style {
    enabled: bool,
}

impl Style {
    pub fn new(force_no_color: bool, is_tty: bool) -> Self {
        let env_no_color = env::var_os("NO_COLOR").is_some();
        Self {
            enabled: !(force_no_color || env_no_color) && is_tty,
        }
    }

    pub fn status(&self, status: &CommandStatus, text: &str) -> String {
        let (symbol, tone) = match status {
            CommandStatus::Ok => ("✔", Tone::Green),
            CommandStatus::UserError => ("✗", Tone::Yellow),
            CommandStatus::Failure => ("✖", Tone::Red),
        };
        self.paint(&format!("{symbol} {text}"), tone)
    }

    /// `error[Kind]:` prefix for stderr diagnostics.
    pub fn error_label(&self, kind: &str) -> String {
        self.paint(&format!("error[{kind}]:"), Tone::Red)
    }

    pub fn hint(&self, text: &str) -> String {
        if !self.enabled {
            return format!("hint: {text}");
        }
        format!("{} {text}", "hint:".cyan().bold())
    }

    pub fn table_header(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        text.bold().to_string()
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if !self.enabled {
            return text.to_string();
        }
        let colored = match tone {
            Tone::Green => text.green().to_string(),
            Tone::Yellow => text.yellow().to_string(),
            Tone::Red => text.red().to_string(),
        };
        colored.bold().to_string()
    }
}

enum Tone {
    Green,
    Yellow,
    Red,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_when_disabled() {
        let style = Style::new(true, true);
        assert_eq!(style.error_label("TimeoutError"), "error[TimeoutError]:");
        assert_eq!(style.hint("retry"), "hint: retry");
        assert_eq!(style.status(&CommandStatus::Ok, "done"), "✔ done");
    }
}
