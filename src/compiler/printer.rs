//! Injected printing of intermediate code.
//!
//! The converter hands every method's code to a [`CfgPrinter`] at fixed points of its
//! compilation. Without a printer nothing is formatted. [`TextCfgPrinter`] collects the
//! dumps in the block format of the C1 visualizer:
//!
//! ```text
//! begin_cfg
//!   name "p.A.f(int)int: Optimized IR (SSA)"
//!   ...
//! end_cfg
//! ```

use std::{fmt, sync::Mutex};

use crate::program::MethodId;

/// Receives code dumps.
pub trait CfgPrinter: Send + Sync {
    /// Prints `code` of `method` under `title`.
    fn print(&self, method: &MethodId, title: &str, code: &dyn fmt::Display);
}

/// Collects dumps into a string.
#[derive(Debug, Default)]
pub struct TextCfgPrinter {
    output: Mutex<String>,
}

impl TextCfgPrinter {
    /// Creates an empty printer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything printed so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.output
            .lock()
            .map(|output| output.clone())
            .unwrap_or_default()
    }
}

impl CfgPrinter for TextCfgPrinter {
    fn print(&self, method: &MethodId, title: &str, code: &dyn fmt::Display) {
        let mut text = format!("begin_cfg\n  name \"{method}: {title}\"\n");
        for line in code.to_string().lines() {
            text.push_str("  ");
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("end_cfg\n");
        if let Ok(mut output) = self.output.lock() {
            output.push_str(&text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_format() {
        let printer = TextCfgPrinter::new();
        let method = MethodId::parse("p.A.f()void").unwrap();
        printer.print(&method, "Initial IR (SSA)", &"B0:\n  return-void");
        let text = printer.contents();
        assert!(text.starts_with("begin_cfg\n  name \"p.A.f()void: Initial IR (SSA)\""));
        assert!(text.contains("    return-void\n"));
        assert!(text.ends_with("end_cfg\n"));
    }
}
