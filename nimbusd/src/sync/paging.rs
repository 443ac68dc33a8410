use thiserror::Error;

use super::index::ItemRecord;
use super::items::is_enumerable;

const SORTED_BY_NAME_SENTINEL: &[u8] = b"#name";
const SORTED_BY_DATE_SENTINEL: &[u8] = b"#date";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,
    #[error("token is not valid UTF-8")]
    NotUtf8,
    #[error("invalid page index: {0}")]
    InvalidPage(String),
    #[error("invalid sync anchor: {0}")]
    InvalidAnchor(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialSort {
    Name,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageToken {
    Initial(InitialSort),
    Page(usize),
}

impl PageToken {
    pub fn decode(bytes: &[u8]) -> Result<Self, TokenError> {
        match bytes {
            [] => Err(TokenError::Empty),
            SORTED_BY_NAME_SENTINEL => Ok(PageToken::Initial(InitialSort::Name)),
            SORTED_BY_DATE_SENTINEL => Ok(PageToken::Initial(InitialSort::Date)),
            other => {
                let text = std::str::from_utf8(other).map_err(|_| TokenError::NotUtf8)?;
                if !text.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(TokenError::InvalidPage(text.to_string()));
                }
                text.parse::<usize>()
                    .map(PageToken::Page)
                    .map_err(|_| TokenError::InvalidPage(text.to_string()))
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            PageToken::Initial(InitialSort::Name) => SORTED_BY_NAME_SENTINEL.to_vec(),
            PageToken::Initial(InitialSort::Date) => SORTED_BY_DATE_SENTINEL.to_vec(),
            PageToken::Page(index) => index.to_string().into_bytes(),
        }
    }

    pub fn is_initial(&self) -> bool {
        matches!(self, PageToken::Initial(_))
    }

    pub fn page_index(&self) -> usize {
        match self {
            PageToken::Initial(_) => 0,
            PageToken::Page(index) => *index,
        }
    }
}

// Positions are counted 1-based over the filtered sequence, in a single pass.
pub fn select_page(records: &[ItemRecord], page: usize, page_size: usize) -> Vec<&ItemRecord> {
    if page_size == 0 {
        return Vec::new();
    }
    let start = page.saturating_mul(page_size).saturating_add(1);
    let stop = start.saturating_add(page_size - 1);
    let mut counter = 0usize;
    let mut selected = Vec::with_capacity(page_size.min(records.len()));
    for record in records {
        if !is_enumerable(record) {
            continue;
        }
        counter += 1;
        if counter > stop {
            break;
        }
        if counter >= start {
            selected.push(record);
        }
    }
    selected
}

pub fn next_page(page: usize, returned: usize, page_size: usize) -> Option<PageToken> {
    (page_size > 0 && returned == page_size).then(|| PageToken::Page(page + 1))
}
