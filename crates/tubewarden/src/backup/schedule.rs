use chrono::prelude::*;

/// The first moment strictly after `now` when the local wall clock shows `at`.
///
/// If `at` doesn't exist on some day because of a DST jump, the backup runs
/// an hour later on that day.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();

    loop {
        let slot = date.and_time(at);
        let resolved = tz
            .from_local_datetime(&slot)
            .earliest()
            .or_else(|| {
                tz.from_local_datetime(&(slot + chrono::Duration::hours(1)))
                    .earliest()
            });

        if let Some(run_at) = resolved.filter(|run_at| run_at > now) {
            return run_at;
        }

        let Some(next) = date.succ_opt() else {
            return now.clone();
        };
        date = next;
    }
}
