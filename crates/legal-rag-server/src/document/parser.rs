use crate::utils::error::ApiError;

const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "txt", "md"];

#[derive(Debug)]
pub struct ParsedDocument {
    pub content: String,
    pub page_count: Option<usize>,
}

pub struct DocumentParser {
    max_file_bytes: usize,
}

impl DocumentParser {
    pub fn new(max_file_mb: usize) -> Self {
        Self {
            max_file_bytes: max_file_mb * 1024 * 1024,
        }
    }

    pub fn supported_extensions() -> &'static [&'static str] {
        SUPPORTED_EXTENSIONS
    }

    /// Extract plain UTF-8 text from an uploaded byte stream. Extension is
    /// detected case-insensitively from the filename suffix.
    pub fn parse(&self, data: &[u8], filename: &str) -> Result<ParsedDocument, ApiError> {
        if data.len() > self.max_file_bytes {
            return Err(ApiError::TooLarge(format!(
                "{} is {} bytes, limit {}",
                filename,
                data.len(),
                self.max_file_bytes
            )));
        }

        let extension = filename
            .rsplit('.')
            .next()
            .filter(|ext| *ext != filename)
            .unwrap_or("")
            .to_lowercase();

        let parsed = match extension.as_str() {
            "pdf" => Self::parse_pdf(data)?,
            "docx" | "doc" => Self::parse_docx(data)?,
            "txt" | "md" => Self::parse_text(data),
            _ => {
                return Err(ApiError::UnsupportedFormat(format!(
                    "extension '{}' not supported (expected one of {})",
                    extension,
                    SUPPORTED_EXTENSIONS.join(", ")
                )))
            }
        };

        if parsed.content.trim().is_empty() {
            return Err(ApiError::ParseFailure(format!(
                "{filename} contains no extractable text"
            )));
        }

        Ok(parsed)
    }

    fn parse_pdf(data: &[u8]) -> Result<ParsedDocument, ApiError> {
        use lopdf::Document;

        let doc = Document::load_mem(data)
            .map_err(|e| ApiError::ParseFailure(format!("PDF load failed: {e}")))?;
        let page_count = doc.get_pages().len();

        let mut content = String::new();

        for page_num in 1..=page_count {
            if let Ok(text) = doc.extract_text(&[page_num as u32]) {
                content.push_str(&text);
                content.push('\n');
            }
        }

        Ok(ParsedDocument {
            content,
            page_count: Some(page_count),
        })
    }

    fn parse_docx(data: &[u8]) -> Result<ParsedDocument, ApiError> {
        use docx_rs::*;

        let docx = read_docx(data)
            .map_err(|e| ApiError::ParseFailure(format!("DOCX read failed: {e}")))?;

        let mut content = String::new();

        for child in docx.document.children {
            if let DocumentChild::Paragraph(para) = child {
                for child in para.children {
                    if let ParagraphChild::Run(run) = child {
                        for child in run.children {
                            if let RunChild::Text(text) = child {
                                content.push_str(&text.text);
                            }
                        }
                    }
                }
                content.push('\n');
            }
        }

        Ok(ParsedDocument {
            content,
            page_count: None,
        })
    }

    /// Plain text with encoding fallback: UTF-8 first, then GB18030.
    /// Chinese legal documents are frequently GBK-encoded.
    fn parse_text(data: &[u8]) -> ParsedDocument {
        let content = match std::str::from_utf8(data) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let (decoded, _, _) = encoding_rs::GB18030.decode(data);
                decoded.into_owned()
            }
        };

        ParsedDocument {
            content,
            page_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_extension() {
        let parser = DocumentParser::new(50);
        let err = parser.parse(b"data", "contract.xlsx").unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_extension() {
        let parser = DocumentParser::new(50);
        let err = parser.parse(b"data", "contract").unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_extension_case_insensitive() {
        let parser = DocumentParser::new(50);
        let parsed = parser.parse("委托合同".as_bytes(), "contract.TXT").unwrap();
        assert_eq!(parsed.content, "委托合同");
    }

    #[test]
    fn test_oversize_rejected() {
        let parser = DocumentParser::new(1); // 1 MB
        let data = vec![0u8; 2 * 1024 * 1024];
        let err = parser.parse(&data, "big.txt").unwrap_err();
        assert!(matches!(err, ApiError::TooLarge(_)));
    }

    #[test]
    fn test_empty_after_parse_rejected() {
        let parser = DocumentParser::new(50);
        let err = parser.parse(b"  \n\t ", "empty.txt").unwrap_err();
        assert!(matches!(err, ApiError::ParseFailure(_)));
    }

    #[test]
    fn test_gb18030_fallback() {
        let parser = DocumentParser::new(50);
        let (gbk_bytes, _, _) = encoding_rs::GB18030.encode("合同编号：二〇二六年");
        let parsed = parser.parse(&gbk_bytes, "old.txt").unwrap();
        assert!(parsed.content.contains("合同编号"));
    }

    #[test]
    fn test_supported_extensions_reported() {
        assert!(DocumentParser::supported_extensions().contains(&"pdf"));
        assert!(DocumentParser::supported_extensions().contains(&"md"));
    }
}
