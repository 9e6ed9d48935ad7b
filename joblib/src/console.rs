//! Text output hooks that tools call instead of writing to the terminal directly.
//!
//! A tool running inside the driver process prints through [`echo`] and decorates
//! text through [`style`]. By default both go to the terminal; while a job runs they
//! are redirected into that job's output (see [`crate::intercept`]).

use std::sync::{Arc, PoisonError, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    fn sgr(self) -> u8 {
        match self {
            Color::Black => 30,
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Blue => 34,
            Color::Magenta => 35,
            Color::Cyan => 36,
            Color::White => 37,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Style {
    pub fg: Option<Color>,
    pub bold: bool,
}

impl Style {
    pub fn fg(color: Color) -> Self {
        Self {
            fg: Some(color),
            bold: false,
        }
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }
}

/// The "print a line" and "style text" capabilities a tool relies on.
pub trait Console: Send + Sync {
    fn echo(&self, text: &str);
    fn style(&self, text: &str, style: Style) -> String;
}

/// Stdout with ANSI styling.
#[derive(Debug, Default)]
pub struct Terminal;

impl Console for Terminal {
    fn echo(&self, text: &str) {
        println!("{}", text);
    }

    fn style(&self, text: &str, style: Style) -> String {
        let mut codes = Vec::new();
        if style.bold {
            codes.push(1.to_string());
        }
        if let Some(color) = style.fg {
            codes.push(color.sgr().to_string());
        }
        if codes.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{}m{}\x1b[0m", codes.join(";"), text)
    }
}

static OVERRIDE: RwLock<Option<Arc<dyn Console>>> = RwLock::new(None);

fn current() -> Option<Arc<dyn Console>> {
    OVERRIDE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Print a line through the installed console.
pub fn echo(text: &str) {
    match current() {
        Some(console) => console.echo(text),
        None => Terminal.echo(text),
    }
}

/// Style text through the installed console.
pub fn style(text: &str, style: Style) -> String {
    match current() {
        Some(console) => console.style(text, style),
        None => Terminal.style(text, style),
    }
}

/// Install `next` as the process-wide console, returning the one it replaces.
pub(crate) fn replace(next: Option<Arc<dyn Console>>) -> Option<Arc<dyn Console>> {
    let mut slot = OVERRIDE.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *slot, next)
}
