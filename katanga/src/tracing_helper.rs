use std::{num::NonZeroU8, panic, path::Path};

use time::format_description::well_known::{iso8601, Iso8601};
use tracing::error;
use tracing_subscriber::{
    fmt::time::LocalTime, prelude::__tracing_subscriber_SubscriberExt, EnvFilter, Layer,
};

const MY_CONFIG: iso8601::EncodedConfig = iso8601::Config::DEFAULT
    .set_time_precision(iso8601::TimePrecision::Second {
        decimal_digits: NonZeroU8::new(3),
    })
    .encode();

fn make_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if cfg!(debug_assertions) {
        EnvFilter::new(concat!(env!("CARGO_CRATE_NAME"), "=trace,katanga_lib=trace"))
    } else {
        EnvFilter::new(concat!(env!("CARGO_CRATE_NAME"), "=info,katanga_lib=info"))
    }
}

/// Logs to `dir/file_name`, and to the console too in debug builds.
pub fn init_tracing(dir: &Path, file_name: &str, ansi: bool) {
    let default_layer = || {
        const WITH_FILE_PATH: bool = cfg!(debug_assertions);
        tracing_subscriber::fmt::layer()
            .compact()
            .with_file(WITH_FILE_PATH)
            .with_line_number(WITH_FILE_PATH)
            .with_target(!WITH_FILE_PATH)
            .with_thread_ids(true)
            .with_timer(LocalTime::new(Iso8601::<MY_CONFIG>))
    };
    let writer = tracing_appender::rolling::never(dir, file_name);
    let file_layer = default_layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(make_filter());

    let result = if cfg!(debug_assertions) {
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(
                file_layer.and_then(default_layer().with_ansi(ansi).with_filter(make_filter())),
            ),
        )
    } else {
        tracing::subscriber::set_global_default(tracing_subscriber::registry().with(file_layer))
    };
    if let Err(err) = result {
        eprintln!("logging unavailable: {}", err);
    }

    panic::set_hook(Box::new(|panic| error!("{}", panic)));
}
