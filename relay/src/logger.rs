//! Logger initialization for the relay binary.

use std::{str::FromStr, sync::Once};

use logforth::{
    append::Stderr,
    filter::EnvFilter,
    layout::{JsonLayout, TextLayout},
};

use crate::args::LogFormat;

static INIT: Once = Once::new();

/// Initializes the process-wide logger once. Subsequent calls are no-ops.
pub fn init(log_filter: &str, format: LogFormat) {
    let log_filter = log_filter.to_owned();
    INIT.call_once(move || apply_logger(&log_filter, format));
}

fn apply_logger(log_filter: &str, format: LogFormat) {
    let filter = EnvFilter::from_str(log_filter).unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter is valid"));

    logforth::builder()
        .dispatch(move |d| {
            let append = match format {
                LogFormat::Pretty => Stderr::default().with_layout(TextLayout::default()),
                LogFormat::Json => Stderr::default().with_layout(JsonLayout::default()),
            };

            d.filter(filter).append(append)
        })
        .apply();
}
