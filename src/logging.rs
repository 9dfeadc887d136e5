/*!
Shared logging setup for all four binaries.

Every binary calls [`init`] once at startup. Normal operation (the dispatch/
preempt/block/unblock/tick trace, emitted at `info`/`warn`/`debug`) goes to
stdout; only `error`-level fatal diagnostics go to stderr. This split is
implemented with a custom formatter rather than `env_logger`'s single
`Target`, since a `Target` applies to every record regardless of level. Level
filtering follows `RUST_LOG`, falling back to `info` so the trace is visible
without any configuration.
*/

use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the global logger exactly once. Safe to call from every binary's
/// `main`; subsequent calls (e.g. in tests that spawn in-process helpers) are
/// no-ops.
///
/// `RUST_LOG` always wins when set; `default_level` (the Kernel's
/// `--log-level` flag) is the fallback filter when it isn't, otherwise `info`.
pub fn init(default_level: Option<&str>) {
    INIT.call_once(|| {
        let default_filter = default_level.unwrap_or("info");
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
            .format(|buf, record| {
                let ts = buf.timestamp_millis();
                let line = format!("[{ts} {:5} {}] {}", record.level(), record.target(), record.args());
                if record.level() == log::Level::Error {
                    writeln!(std::io::stderr(), "{line}")
                } else {
                    writeln!(std::io::stdout(), "{line}")
                }
            })
            .init();
    });
}
