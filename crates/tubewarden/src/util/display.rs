use std::time::Duration;

pub(crate) fn human_size(bytes: impl humansize::ToF64 + humansize::Unsigned) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

pub(crate) fn human_duration(duration: Duration) -> String {
    timeago::Formatter::new()
        .num_items(2)
        .ago("")
        .convert(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn formats_sizes() {
        expect!["48 MiB"].assert_eq(&human_size(48_u64 * 1024 * 1024));
        expect!["512 B"].assert_eq(&human_size(512_u64));
    }
}
