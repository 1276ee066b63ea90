//! Blob key derivation.
//!
//! Layout:
//!
//! - `cache/<source>/<feed-name>.json`
//! - `cache/<source>/articles/<shortcode>_<lang>.json`
//! - `cache/translations/<article_id>/<source_lang>_<target_lang>.json`
//!
//! Language codes may not contain `_`, so the final `_` in a file stem always
//! separates the identifier from the language and two distinct inputs can never
//! produce the same key.

use thiserror::Error;

pub const CACHE_ROOT: &str = "cache";
pub const TRANSLATIONS_PREFIX: &str = "cache/translations/";
const ARTICLES_SEGMENT: &str = "articles";
const EXTENSION: &str = ".json";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("`{field}` must not be empty")]
    Empty { field: &'static str },
    #[error("`{field}` must not contain `{separator}`: {value}")]
    Separator {
        field: &'static str,
        separator: char,
        value: String,
    },
}

/// `cache/<source>/`: covers the feed file and every article under the source.
pub fn source_prefix(source: &str) -> Result<String, KeyError> {
    let source = segment("source", source)?;
    Ok(format!("{CACHE_ROOT}/{source}/"))
}

pub fn articles_prefix(source: &str) -> Result<String, KeyError> {
    Ok(format!("{}{ARTICLES_SEGMENT}/", source_prefix(source)?))
}

pub fn feed_key(source: &str, feed_name: &str) -> Result<String, KeyError> {
    let feed_name = segment("feed_name", feed_name)?;
    Ok(format!("{}{feed_name}{EXTENSION}", source_prefix(source)?))
}

pub fn article_key(source: &str, shortcode: &str, lang: &str) -> Result<String, KeyError> {
    let shortcode = segment("shortcode", shortcode)?;
    let lang = language("language_code", lang)?;
    Ok(format!(
        "{}{shortcode}_{lang}{EXTENSION}",
        articles_prefix(source)?
    ))
}

pub fn translation_key(
    article_id: &str,
    source_lang: &str,
    target_lang: &str,
) -> Result<String, KeyError> {
    let article_id = segment("article_id", article_id)?;
    let source_lang = language("source_lang", source_lang)?;
    let target_lang = language("target_lang", target_lang)?;
    Ok(format!(
        "{TRANSLATIONS_PREFIX}{article_id}/{source_lang}_{target_lang}{EXTENSION}"
    ))
}

fn segment<'a>(field: &'static str, value: &'a str) -> Result<&'a str, KeyError> {
    if value.is_empty() {
        return Err(KeyError::Empty { field });
    }
    reject(field, value, '/')?;
    reject(field, value, '\\')?;
    if value == "." || value == ".." {
        return Err(KeyError::Separator {
            field,
            separator: '.',
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn language<'a>(field: &'static str, value: &'a str) -> Result<&'a str, KeyError> {
    let value = segment(field, value)?;
    reject(field, value, '_')?;
    Ok(value)
}

fn reject(field: &'static str, value: &str, separator: char) -> Result<(), KeyError> {
    if value.contains(separator) {
        return Err(KeyError::Separator {
            field,
            separator,
            value: value.to_string(),
        });
    }
    Ok(())
}
