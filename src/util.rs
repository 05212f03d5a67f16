use zip::DateTime;

/// Returns a DateTime representing the value of the SOURCE_DATE_EPOCH
/// environment variable, for reproducible archive output.
/// Note that the earliest timestamp a zip file can represent is 1980-01-01.
pub(crate) fn zip_mtime() -> DateTime {
    let res = std::env::var("SOURCE_DATE_EPOCH")
        .map_err(anyhow::Error::from)
        .and_then(|raw| datetime_from_epoch(raw.parse()?));

    res.unwrap_or_default()
}

fn datetime_from_epoch(epoch: i64) -> anyhow::Result<DateTime> {
    let dt = time::OffsetDateTime::from_unix_timestamp(epoch)?;
    Ok(DateTime::try_from(dt)?)
}
