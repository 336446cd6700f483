use chrono::NaiveDate;

/// A journal article cannot predate its preprint: pass only candidates
/// published strictly after the preprint was posted.
pub fn is_later(preprint: NaiveDate, candidate: NaiveDate) -> bool {
    candidate > preprint
}

/// Date filter over an optional candidate date. Undated candidates fail.
pub fn passes(preprint: NaiveDate, candidate: Option<NaiveDate>) -> bool {
    candidate.is_some_and(|d| is_later(preprint, d))
}

/// Parse the date formats found in bibliographic records.
///
/// Accepts `2020/08/12 06:00` (MEDLINE EDAT), `2020-08-12`, `20200812`,
/// `2020 Aug 12`, `2020 Aug` and a bare year; missing parts default to 1.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head = value.get(..10).unwrap_or(value);

    for sep in ['/', '-'] {
        if head.contains(sep) {
            let parts: Vec<i64> = head
                .split(sep)
                .map(|p| p.trim().parse().ok())
                .collect::<Option<_>>()?;
            return from_date_parts(&parts);
        }
    }

    if value.len() == 8 && value.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok();
    }

    let mut tokens = value.split_whitespace();
    let year: i32 = tokens.next()?.parse().ok()?;
    let month = match tokens.next() {
        Some(m) => month_number(m)?,
        None => 1,
    };
    let day = tokens.next().and_then(|d| d.parse().ok()).unwrap_or(1);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Build a date from Crossref-style `[year, month, day]` parts.
pub fn from_date_parts(parts: &[i64]) -> Option<NaiveDate> {
    let year = i32::try_from(*parts.first()?).ok()?;
    let month = parts.get(1).map_or(Some(1), |m| u32::try_from(*m).ok())?;
    let day = parts.get(2).map_or(Some(1), |d| u32::try_from(*d).ok())?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        // "Spring", "Winter" and friends
        _ => return None,
    };
    Some(month)
}
