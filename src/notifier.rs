use owo_colors::OwoColorize;

/// User-facing notification sink. The host decides where messages land;
/// the core only distinguishes severity.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Colored stderr notifier for the CLI harness. When notifications are
/// disabled in settings, messages are demoted to plain debug lines instead
/// of disappearing.
pub struct TerminalNotifier {
    enabled: bool,
}

impl TerminalNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Notifier for TerminalNotifier {
    fn info(&self, message: &str) {
        if self.enabled {
            eprintln!("{} {message}", "info:".green());
        } else {
            eprintln!("[devsitter] {message}");
        }
    }

    fn warn(&self, message: &str) {
        if self.enabled {
            eprintln!("{} {message}", "warning:".yellow());
        } else {
            eprintln!("[devsitter] {message}");
        }
    }

    fn error(&self, message: &str) {
        if self.enabled {
            eprintln!("{} {message}", "error:".red());
        } else {
            eprintln!("[devsitter] {message}");
        }
    }
}

/// Collects messages for assertions in unit tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryNotifier {
    pub messages: std::sync::Mutex<Vec<(&'static str, String)>>,
}

#[cfg(test)]
impl Notifier for MemoryNotifier {
    fn info(&self, message: &str) {
        self.messages.lock().unwrap().push(("info", message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.messages.lock().unwrap().push(("warn", message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push(("error", message.to_string()));
    }
}
