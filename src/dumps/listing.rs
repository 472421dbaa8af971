//! Scraping of remote directory listings
//!
//! The dump server publishes plain HTML indexes. Each dump directory appears on a
//! line of its own, and the date stamp sits at a fixed offset after a known
//! prefix. This is brittle, but it is the contract the server offers.

/// Row of a `<table>` style index (incremental dumps):
/// `<tr><td class="n"><a href="20240102/">20240102</a>/</td>...`
const TABLE_ROW_PREFIX: &str = "<tr><td class=\"n\"><a href=\"";

/// Plain anchor index (main dumps): `<a href="20240101/">20240101/</a>`
const ANCHOR_PREFIX: &str = "<a href=\"";

const DATE_STAMP_LEN: usize = 8;

/// Extract all date stamps from an index page, newest first, without duplicates
pub fn scrape_date_stamps(html: &str) -> Vec<String> {
    let mut stamps: Vec<String> = html
        .lines()
        .map(str::trim_start)
        .filter_map(|line| {
            let offset = if line.starts_with(TABLE_ROW_PREFIX) {
                TABLE_ROW_PREFIX.len()
            } else if line.starts_with(ANCHOR_PREFIX) {
                ANCHOR_PREFIX.len()
            } else {
                return None;
            };
            line.get(offset..offset + DATE_STAMP_LEN)
        })
        .filter(|stamp| stamp.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .collect();

    stamps.sort_unstable_by(|a, b| b.cmp(a));
    stamps.dedup();
    stamps
}
