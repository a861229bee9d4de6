//! HTML scraping stages of the feed pipeline.
//!
//! Every source shares the same scraping logic; only the compiled selectors
//! differ. Scraping happens in two phases:
//!
//! 1. **Walking**: [`listing`] turns a listing page into candidates
//!    (title, absolute detail URL, listing-row author and time)
//! 2. **Extracting**: [`content`] turns each detail page into cleaned
//!    markup plus raw publication metadata, using [`markup`] to sanitize
//!
//! | Layout | Used by | Content | Timestamp |
//! |--------|---------|---------|-----------|
//! | Single region | forum first posts, news articles | region outer markup | JSON-LD, then meta tags |
//! | Replies | card forum threads | replies, newest first | last reply's relative time |
//!
//! Pages whose markup no longer matches are skipped, never guessed at.

pub mod content;
pub mod listing;
pub mod markup;
