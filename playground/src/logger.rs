use log::LevelFilter;

static TAG_SIZE: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(20);

/// Initialize the logger. `RUST_LOG` takes precedence over `level`.
pub fn init(level: LevelFilter) {
    use env_logger::fmt::Color;
    use std::{io::Write, sync::atomic::Ordering};

    fn color(target: &str) -> Color {
        // Some colors are hard to read on dark terminals
        let hash = target.bytes().fold(42u8, |c, x| c ^ x);
        Color::Ansi256(match hash {
            c @ 0..=1 => c + 2,
            c @ 16..=21 => c + 6,
            c @ 52..=55 | c @ 126..=129 => c + 4,
            c @ 163..=165 | c @ 200..=201 => c + 3,
            c @ 207 => c + 1,
            c @ 232..=240 => c + 9,
            c => c,
        })
    }

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder.format(|buf, record| {
        let timestamp = buf.timestamp_millis().to_string();
        let timestamp = timestamp.strip_suffix('Z').unwrap_or(&timestamp);

        let mut level = buf.default_level_style(record.metadata().level());
        level.set_bold(true);
        let level = level.value(record.metadata().level().as_str());

        // Strip the crate name: playground_runtime::runner -> runner
        let target = record.target();
        let tag = target.find("::").map(|p| &target[p + 2..]).unwrap_or(target);

        TAG_SIZE.fetch_max(tag.len(), Ordering::SeqCst);
        let tag_size = TAG_SIZE.load(Ordering::SeqCst);
        let mut tag_style = buf.style();
        tag_style.set_color(color(tag));

        writeln!(
            buf,
            "{} {:>s$}  {:<5}: {}",
            timestamp,
            tag_style.value(tag),
            level,
            record.args(),
            s = tag_size,
        )
    });

    builder.init()
}
