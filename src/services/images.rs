//! Image attachments embedded in message text
//!
//! Users attach images as markdown (`![alt](url)`) or as bare
//! `data:image/...;base64,...` URIs. Providers pull them out of the latest user
//! turn, resolve them to inline base64 when the upstream needs it, and render
//! generated images back as markdown.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::transport::HttpTransport;
use crate::error::{RelayError, Result};

static MARKDOWN_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(\s*([^)\s]+)\s*\)").expect("markdown image regex"));

static DATA_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=]+").expect("data uri regex")
});

/// Split text into the prose left after removing images, and the image sources in order
#[must_use]
pub fn extract_images(text: &str) -> (String, Vec<String>) {
    let mut found: Vec<(usize, usize, String)> = MARKDOWN_IMAGE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let url = caps.get(1)?;
            Some((whole.start(), whole.end(), url.as_str().to_string()))
        })
        .collect();

    for m in DATA_URI.find_iter(text) {
        let inside_markdown = found
            .iter()
            .any(|(start, end, _)| m.start() >= *start && m.end() <= *end);
        if !inside_markdown {
            found.push((m.start(), m.end(), m.as_str().to_string()));
        }
    }
    found.sort_by_key(|(start, _, _)| *start);

    let mut content = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, _) in &found {
        content.push_str(&text[cursor..*start]);
        cursor = *end;
    }
    content.push_str(&text[cursor..]);

    (content, found.into_iter().map(|(_, _, url)| url).collect())
}

/// A resolved image source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Inline image from a data URI
    Inline { mime: String, data: String },
    /// Remote image fetched on demand
    Remote(String),
}

impl ImageRef {
    /// Parse an image source
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed data URIs or unsupported schemes
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();

        if let Some(rest) = source.strip_prefix("data:") {
            let (mime, data) = rest
                .split_once(";base64,")
                .ok_or_else(|| RelayError::validation("invalid image data uri"))?;
            if STANDARD.decode(data).is_err() {
                return Err(RelayError::validation("invalid base64 image data"));
            }
            return Ok(Self::Inline {
                mime: mime.to_string(),
                data: data.to_string(),
            });
        }

        if source.starts_with("http://") || source.starts_with("https://") {
            return Ok(Self::Remote(source.to_string()));
        }

        Err(RelayError::validation(format!(
            "unsupported image source: {}",
            truncate(source, 24)
        )))
    }

    /// The source as given to the upstream: a data URI or the remote URL
    #[must_use]
    pub fn url(&self) -> String {
        match self {
            Self::Inline { mime, data } => format!("data:{mime};base64,{data}"),
            Self::Remote(url) => url.clone(),
        }
    }

    /// Resolve to `(mime, raw base64)`, downloading remote images
    ///
    /// # Errors
    ///
    /// Returns transport errors when the download fails
    pub async fn resolve(
        &self,
        transport: &HttpTransport,
        cancel: &CancellationToken,
    ) -> Result<(String, String)> {
        match self {
            Self::Inline { mime, data } => Ok((mime.clone(), data.clone())),
            Self::Remote(url) => {
                let response = transport.download(url, cancel).await?;
                let mime = response
                    .content_type
                    .as_deref()
                    .filter(|ct| ct.starts_with("image/"))
                    .map_or("image/png", |ct| ct.split(';').next().unwrap_or(ct))
                    .to_string();
                Ok((mime, STANDARD.encode(&response.body)))
            }
        }
    }

    /// Resolve to raw base64 without the data URI prefix
    ///
    /// # Errors
    ///
    /// Returns transport errors when the download fails
    pub async fn raw_base64(
        &self,
        transport: &HttpTransport,
        cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(self.resolve(transport, cancel).await?.1)
    }

    /// Resolve to a full data URI
    ///
    /// # Errors
    ///
    /// Returns transport errors when the download fails
    pub async fn data_uri(
        &self,
        transport: &HttpTransport,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let (mime, data) = self.resolve(transport, cancel).await?;
        Ok(format!("data:{mime};base64,{data}"))
    }
}

/// Render an image URL as markdown
#[must_use]
pub fn image_markdown(url: &str) -> String {
    format!("![image]({url})")
}

/// Render raw base64 PNG data as a markdown image
#[must_use]
pub fn base64_image_markdown(data: &str) -> String {
    image_markdown(&format!("data:image/png;base64,{data}"))
}

/// Wrap text in a fenced markdown code block
#[must_use]
pub fn markdown_code(lang: &str, body: &str) -> String {
    format!("```{lang}\n{body}\n```")
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_markdown_and_data_uri_in_order() {
        let text = "fix this data:image/png;base64,QUJD then ![mask](https://x/mask.png) please";
        let (content, images) = extract_images(text);
        assert_eq!(
            images,
            vec![
                "data:image/png;base64,QUJD".to_string(),
                "https://x/mask.png".to_string()
            ]
        );
        assert_eq!(content, "fix this  then  please");
    }

    #[test]
    fn test_data_uri_inside_markdown_counted_once() {
        let (content, images) = extract_images("![img](data:image/jpeg;base64,QUJD) cat");
        assert_eq!(images, vec!["data:image/jpeg;base64,QUJD".to_string()]);
        assert_eq!(content.trim(), "cat");
    }

    #[test]
    fn test_no_images() {
        let (content, images) = extract_images("just text");
        assert!(images.is_empty());
        assert_eq!(content, "just text");
    }

    #[test]
    fn test_parse_image_ref() {
        let inline = ImageRef::parse("data:image/png;base64,QUJD").unwrap();
        assert_eq!(
            inline,
            ImageRef::Inline {
                mime: "image/png".into(),
                data: "QUJD".into()
            }
        );
        assert_eq!(inline.url(), "data:image/png;base64,QUJD");

        assert!(matches!(
            ImageRef::parse("https://x/a.png").unwrap(),
            ImageRef::Remote(_)
        ));
        assert!(ImageRef::parse("ftp://x/a.png").is_err());
        assert!(ImageRef::parse("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn test_markdown_helpers() {
        assert_eq!(image_markdown("https://x/a.png"), "![image](https://x/a.png)");
        assert_eq!(markdown_code("json", "{}"), "```json\n{}\n```");
    }
}
