// The core module contains all business logic: data containers, the fetch
// pipeline, and the parser. It reaches the network only through ports.

#[path = "grid.rs"]
pub mod grid;

#[path = "sheet.rs"]
pub mod sheet;

#[path = "locale.rs"]
pub mod locale;

#[path = "cancel.rs"]
pub mod cancel;

#[path = "report.rs"]
pub mod report;

#[path = "fetch.rs"]
pub mod fetch;

#[path = "parser.rs"]
pub mod parser;
