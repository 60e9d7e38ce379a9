//! 内置平台适配器

pub mod console;

pub use console::ConsoleAdapter;
