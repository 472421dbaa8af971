//! MediaWiki XML export parser
//!
//! Pull-parses a `<mediawiki>` export and hands every `<revision>` to a
//! [`RevisionProcessor`], in document order. One scratch [`Revision`] is reused
//! for the whole stream.
//!
//! Errors inside a `<page>` are contained to that page: the page is logged,
//! the reader skips to the matching `</page>` and parsing resumes with the next
//! page. Errors outside of pages end the pass.

use super::{ExtractError, ExtractStats};
use crate::processor::RevisionProcessor;
use crate::types::{Revision, SiteInfo};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::io::BufRead;
use std::str::FromStr;
use tracing::{debug, warn};

/// Errors tolerated while skipping a broken page before the pass is abandoned
const MAX_RESYNC_ERRORS: u32 = 100;

/// Elements of the export schema the extractor cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    MediaWiki,
    SiteInfo,
    SiteName,
    Base,
    Namespace,
    Page,
    Title,
    Ns,
    Id,
    Revision,
    ParentId,
    Timestamp,
    Contributor,
    Username,
    Ip,
    Comment,
    Model,
    Format,
    Text,
    Other,
}

impl Tag {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"mediawiki" => Tag::MediaWiki,
            b"siteinfo" => Tag::SiteInfo,
            b"sitename" => Tag::SiteName,
            b"base" => Tag::Base,
            b"namespace" => Tag::Namespace,
            b"page" => Tag::Page,
            b"title" => Tag::Title,
            b"ns" => Tag::Ns,
            b"id" => Tag::Id,
            b"revision" => Tag::Revision,
            b"parentid" => Tag::ParentId,
            b"timestamp" => Tag::Timestamp,
            b"contributor" => Tag::Contributor,
            b"username" => Tag::Username,
            b"ip" => Tag::Ip,
            b"comment" => Tag::Comment,
            b"model" => Tag::Model,
            b"format" => Tag::Format,
            b"text" => Tag::Text,
            _ => Tag::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Start(Tag),
    End(Tag),
    Eof,
}

/// Event source that tracks element nesting and collects character data
///
/// End tags are matched against the open elements here rather than in the XML
/// reader, so that a mismatched tag can be reported without losing track of
/// where the enclosing page ends.
struct Tokenizer<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    /// Character data since the last start tag
    text: String,
    /// `key` attribute of the last `<namespace>` start tag
    namespace_key: Option<i32>,
    open: Vec<Tag>,
    pending: Option<Token>,
}

impl<R: BufRead> Tokenizer<R> {
    fn new(reader: R) -> Self {
        let mut reader = Reader::from_reader(reader);
        let config = reader.config_mut();
        config.expand_empty_elements = true;
        config.check_end_names = false;
        Self {
            reader,
            buf: Vec::with_capacity(8192),
            text: String::new(),
            namespace_key: None,
            open: Vec::new(),
            pending: None,
        }
    }

    fn next_token(&mut self) -> Result<Token, ExtractError> {
        if let Some(token) = self.pending.take() {
            return Ok(token);
        }
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf).map_err(xml_error)?;
            match event {
                Event::Start(e) => {
                    let tag = Tag::from_name(e.local_name().as_ref());
                    self.text.clear();
                    if tag == Tag::Namespace {
                        self.namespace_key = Some(namespace_key(&e)?);
                    }
                    self.open.push(tag);
                    return Ok(Token::Start(tag));
                }
                Event::End(e) => {
                    let tag = Tag::from_name(e.local_name().as_ref());
                    if self.open.last() == Some(&tag) {
                        self.open.pop();
                        return Ok(Token::End(tag));
                    }
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if tag != Tag::Other {
                        if let Some(pos) = self.open.iter().rposition(|t| *t == tag) {
                            self.open.truncate(pos);
                            self.pending = Some(Token::End(tag));
                        }
                    }
                    return Err(ExtractError::Format(format!("mismatched end tag </{}>", name)));
                }
                Event::Text(e) => {
                    let text = e.unescape().map_err(xml_error)?;
                    self.text.push_str(&text);
                }
                Event::CData(e) => {
                    self.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
                Event::Eof => return Ok(Token::Eof),
                _ => {}
            }
        }
    }

    fn is_nested(&self) -> bool {
        !self.open.is_empty()
    }

    fn number<T: FromStr>(&self, field: &str) -> Result<T, ExtractError> {
        self.text
            .trim()
            .parse()
            .map_err(|_| ExtractError::Format(format!("invalid <{}> value '{}'", field, self.text.trim())))
    }
}

/// Separate I/O failures (fatal) from XML syntax errors (page-recoverable)
fn xml_error(e: quick_xml::Error) -> ExtractError {
    match e {
        quick_xml::Error::Io(io) => ExtractError::Io(std::io::Error::new(io.kind(), io.to_string())),
        other => ExtractError::Xml(other),
    }
}

fn namespace_key(start: &BytesStart<'_>) -> Result<i32, ExtractError> {
    let attr = start
        .try_get_attribute("key")
        .map_err(|e| ExtractError::Format(format!("bad <namespace> attribute: {}", e)))?
        .ok_or_else(|| ExtractError::Format("<namespace> without key".to_string()))?;
    std::str::from_utf8(&attr.value)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| {
            ExtractError::Format(format!(
                "invalid namespace key '{}'",
                String::from_utf8_lossy(&attr.value)
            ))
        })
}

fn set_field(field: &mut String, value: &str) {
    field.clear();
    field.push_str(value);
}

/// Streaming extractor for one XML revision dump
pub struct RevisionExtractor<R> {
    tokens: Tokenizer<R>,
    source_name: String,
    site: SiteInfo,
    revision: Revision,
    /// Whether `<ns>` was present in the current page
    has_namespace: bool,
    announced: bool,
    stats: ExtractStats,
}

impl<R: BufRead> RevisionExtractor<R> {
    pub fn new(reader: R, source_name: impl Into<String>) -> Self {
        Self {
            tokens: Tokenizer::new(reader),
            source_name: source_name.into(),
            site: SiteInfo::default(),
            revision: Revision::default(),
            has_namespace: false,
            announced: false,
            stats: ExtractStats::default(),
        }
    }

    /// Parse the whole stream, feeding `processor`
    ///
    /// `start_pass` is called exactly once, before the first revision (with an
    /// empty [`SiteInfo`] if the export has no `<siteinfo>`). Calling
    /// `finish_pass` is left to the caller.
    pub fn run(mut self, processor: &mut dyn RevisionProcessor) -> Result<ExtractStats, ExtractError> {
        let mut errors = 0u32;
        loop {
            let token = match self.tokens.next_token() {
                Ok(token) => token,
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    // Leftovers of a page that was already skipped
                    errors += 1;
                    warn!(source = %self.source_name, error = %e, "Skipping malformed markup between pages");
                    if errors >= MAX_RESYNC_ERRORS {
                        return Err(ExtractError::Format(format!(
                            "gave up after {} errors outside of pages",
                            errors
                        )));
                    }
                    continue;
                }
            };
            match token {
                Token::Start(Tag::SiteInfo) => {
                    self.read_site_info()?;
                    self.announce(processor)?;
                }
                Token::Start(Tag::Page) => {
                    errors = 0;
                    self.read_page_recovering(processor)?;
                }
                Token::Eof => {
                    if self.tokens.is_nested() {
                        return Err(ExtractError::UnexpectedEof("mediawiki"));
                    }
                    break;
                }
                _ => {}
            }
        }
        self.announce(processor)?;
        debug!(
            source = %self.source_name,
            pages = self.stats.pages,
            revisions = self.stats.revisions,
            "Extraction complete"
        );
        Ok(self.stats)
    }

    fn announce(&mut self, processor: &mut dyn RevisionProcessor) -> Result<(), ExtractError> {
        if !self.announced {
            self.announced = true;
            processor.start_pass(&self.site)?;
        }
        Ok(())
    }

    fn read_site_info(&mut self) -> Result<(), ExtractError> {
        self.site.clear();
        loop {
            match self.tokens.next_token()? {
                Token::End(Tag::SiteName) => set_field(&mut self.site.site_name, &self.tokens.text),
                Token::End(Tag::Base) => set_field(&mut self.site.base_url, &self.tokens.text),
                Token::End(Tag::Namespace) => {
                    if let Some(key) = self.tokens.namespace_key.take() {
                        self.site.namespaces.insert(key, self.tokens.text.clone());
                    }
                }
                Token::End(Tag::SiteInfo) => return Ok(()),
                Token::Eof => return Err(ExtractError::UnexpectedEof("siteinfo")),
                _ => {}
            }
        }
    }

    fn read_page_recovering(&mut self, processor: &mut dyn RevisionProcessor) -> Result<(), ExtractError> {
        self.revision.reset_page();
        self.has_namespace = false;
        self.stats.pages += 1;

        match self.read_page(processor) {
            Ok(()) => Ok(()),
            Err(e) if !e.is_recoverable() => Err(e),
            Err(e) => {
                self.stats.pages_with_errors += 1;
                warn!(
                    source = %self.source_name,
                    page_id = self.revision.page_id,
                    title = %self.revision.title,
                    error = %e,
                    "Skipping malformed page"
                );
                self.skip_to_page_end()
            }
        }
    }

    fn skip_to_page_end(&mut self) -> Result<(), ExtractError> {
        let mut errors = 0u32;
        loop {
            match self.tokens.next_token() {
                Ok(Token::End(Tag::Page)) => return Ok(()),
                Ok(Token::Eof) => return Err(ExtractError::UnexpectedEof("page")),
                Ok(_) => {}
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    errors += 1;
                    debug!(source = %self.source_name, error = %e, "Error while resynchronizing");
                    if errors >= MAX_RESYNC_ERRORS {
                        return Err(ExtractError::Format(format!(
                            "gave up after {} errors while looking for </page>",
                            errors
                        )));
                    }
                }
            }
        }
    }

    fn read_page(&mut self, processor: &mut dyn RevisionProcessor) -> Result<(), ExtractError> {
        loop {
            match self.tokens.next_token()? {
                Token::Start(Tag::Revision) => self.read_revision(processor)?,
                Token::Start(Tag::Page) => {
                    return Err(ExtractError::Format("<page> inside <page>".to_string()))
                }
                Token::End(Tag::Title) => set_field(&mut self.revision.title, &self.tokens.text),
                Token::End(Tag::Ns) => {
                    self.revision.namespace = self.tokens.number("ns")?;
                    self.has_namespace = true;
                }
                Token::End(Tag::Id) => self.revision.page_id = self.tokens.number("id")?,
                Token::End(Tag::Page) => return Ok(()),
                Token::Eof => return Err(ExtractError::UnexpectedEof("page")),
                _ => {}
            }
        }
    }

    fn read_revision(&mut self, processor: &mut dyn RevisionProcessor) -> Result<(), ExtractError> {
        self.revision.reset_revision();
        if !self.has_namespace {
            self.revision.namespace = self.namespace_from_title();
        }
        loop {
            match self.tokens.next_token()? {
                Token::Start(Tag::Contributor) => self.read_contributor()?,
                Token::Start(Tag::Revision) | Token::Start(Tag::Page) => {
                    return Err(ExtractError::Format("unterminated <revision>".to_string()))
                }
                Token::End(Tag::Id) => self.revision.revision_id = self.tokens.number("id")?,
                Token::End(Tag::ParentId) => {
                    self.revision.parent_id = Some(self.tokens.number("parentid")?)
                }
                Token::End(Tag::Timestamp) => {
                    set_field(&mut self.revision.timestamp, &self.tokens.text)
                }
                Token::End(Tag::Comment) => set_field(&mut self.revision.comment, &self.tokens.text),
                Token::End(Tag::Model) => {
                    set_field(&mut self.revision.content_model, &self.tokens.text)
                }
                Token::End(Tag::Format) => set_field(&mut self.revision.format, &self.tokens.text),
                Token::End(Tag::Text) => {
                    std::mem::swap(&mut self.revision.text, &mut self.tokens.text)
                }
                Token::End(Tag::Revision) => break,
                Token::Eof => return Err(ExtractError::UnexpectedEof("revision")),
                _ => {}
            }
        }

        self.announce(processor)?;
        processor.process_revision(&self.revision)?;
        self.stats.revisions += 1;
        Ok(())
    }

    fn read_contributor(&mut self) -> Result<(), ExtractError> {
        loop {
            match self.tokens.next_token()? {
                Token::End(Tag::Username) | Token::End(Tag::Ip) => {
                    set_field(&mut self.revision.contributor.name, &self.tokens.text)
                }
                Token::End(Tag::Id) => self.revision.contributor.id = Some(self.tokens.number("id")?),
                Token::End(Tag::Contributor) => return Ok(()),
                Token::Eof => return Err(ExtractError::UnexpectedEof("contributor")),
                _ => {}
            }
        }
    }

    /// Namespace of exports without `<ns>`, from the title prefix
    fn namespace_from_title(&self) -> i32 {
        self.revision
            .title
            .split_once(':')
            .and_then(|(prefix, _)| self.site.namespaces.key_for(prefix))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::ProcessingError;
    use crate::types::content_model;

    #[derive(Default)]
    struct Collect {
        sites: Vec<SiteInfo>,
        revisions: Vec<Revision>,
        fail_on: Option<u64>,
        abort_on: Option<u64>,
    }

    impl RevisionProcessor for Collect {
        fn start_pass(&mut self, site: &SiteInfo) -> Result<(), ProcessingError> {
            self.sites.push(site.clone());
            Ok(())
        }

        fn process_revision(&mut self, revision: &Revision) -> Result<(), ProcessingError> {
            if self.abort_on == Some(revision.revision_id) {
                return Err(ProcessingError::Aborted("stop".to_string()));
            }
            if self.fail_on == Some(revision.revision_id) {
                return Err(ProcessingError::Failed("rejected".to_string()));
            }
            self.revisions.push(revision.clone());
            Ok(())
        }
    }

    const SITE_INFO: &str = r#"<siteinfo>
    <sitename>Wikidata</sitename>
    <dbname>wikidatawiki</dbname>
    <base>https://www.wikidata.org/wiki/Wikidata:Main_Page</base>
    <case>first-letter</case>
    <namespaces>
      <namespace key="0" case="first-letter" />
      <namespace key="1" case="first-letter">Talk</namespace>
      <namespace key="120" case="first-letter">Property</namespace>
    </namespaces>
  </siteinfo>"#;

    fn export(body: &str) -> String {
        format!(
            "<mediawiki xmlns=\"http://www.mediawiki.org/xml/export-0.11/\" version=\"0.11\">\n  {}\n{}\n</mediawiki>\n",
            SITE_INFO, body
        )
    }

    fn page(id: u64, title: &str, revisions: &[(u64, &str)]) -> String {
        let mut xml = format!("<page>\n<title>{}</title>\n<ns>0</ns>\n<id>{}</id>\n", title, id);
        for (rev_id, text) in revisions {
            xml.push_str(&format!(
                "<revision><id>{}</id><timestamp>2024-01-15T10:30:00Z</timestamp>\
                 <contributor><username>Editor</username><id>7</id></contributor>\
                 <model>wikibase-item</model><format>application/json</format>\
                 <text bytes=\"2\">{}</text></revision>\n",
                rev_id, text
            ));
        }
        xml.push_str("</page>");
        xml
    }

    fn run(xml: &str, collect: &mut Collect) -> Result<ExtractStats, ExtractError> {
        RevisionExtractor::new(xml.as_bytes(), "test").run(collect)
    }

    #[test]
    fn test_site_info_is_announced_first() {
        let xml = export(&page(1, "Q1", &[(10, "{}")]));
        let mut collect = Collect::default();
        run(&xml, &mut collect).unwrap();

        assert_eq!(collect.sites.len(), 1);
        let site = &collect.sites[0];
        assert_eq!(site.site_name, "Wikidata");
        assert_eq!(site.namespaces.prefix(0), Some(""));
        assert_eq!(site.namespaces.prefix(120), Some("Property"));
        assert_eq!(site.article_path(), Some("https://www.wikidata.org/wiki/"));
    }

    #[test]
    fn test_revisions_in_document_order() {
        let xml = export(&format!(
            "{}\n{}",
            page(1, "Q1", &[(10, "{\"a\":1}"), (12, "{\"a\":2}")]),
            page(2, "Q2", &[(11, "{}")])
        ));
        let mut collect = Collect::default();
        let stats = run(&xml, &mut collect).unwrap();

        let ids: Vec<(u64, u64)> = collect
            .revisions
            .iter()
            .map(|r| (r.page_id, r.revision_id))
            .collect();
        assert_eq!(ids, vec![(1, 10), (1, 12), (2, 11)]);
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.revisions, 3);

        let first = &collect.revisions[0];
        assert_eq!(first.title, "Q1");
        assert_eq!(first.text, "{\"a\":1}");
        assert_eq!(first.content_model, content_model::WIKIBASE_ITEM);
        assert!(first.is_json());
        assert_eq!(first.contributor.name, "Editor");
        assert_eq!(first.contributor.id, Some(7));
    }

    #[test]
    fn test_optional_fields_and_anonymous_contributor() {
        let body = r#"<page>
    <title>Talk:Example</title>
    <id>5</id>
    <revision>
      <id>50</id>
      <parentid>49</parentid>
      <timestamp>2024-02-01T00:00:00Z</timestamp>
      <contributor><ip>192.0.2.1</ip></contributor>
      <comment>fix &amp; tidy</comment>
      <text xml:space="preserve"><![CDATA[a < b]]></text>
    </revision>
  </page>"#;
        let mut collect = Collect::default();
        run(&export(body), &mut collect).unwrap();

        let rev = &collect.revisions[0];
        assert_eq!(rev.parent_id, Some(49));
        assert_eq!(rev.namespace, 1, "namespace derived from title prefix");
        assert!(rev.contributor.is_anonymous());
        assert_eq!(rev.contributor.name, "192.0.2.1");
        assert_eq!(rev.comment, "fix & tidy");
        assert_eq!(rev.text, "a < b");
        assert_eq!(rev.content_model, content_model::WIKITEXT);
    }

    #[test]
    fn test_fields_do_not_leak_between_revisions() {
        let body = r#"<page><title>Q3</title><ns>0</ns><id>3</id>
    <revision><id>30</id><comment>first</comment><model>wikibase-item</model><text>x</text></revision>
    <revision><id>31</id><text bytes="0" /></revision>
  </page>"#;
        let mut collect = Collect::default();
        run(&export(body), &mut collect).unwrap();

        let second = &collect.revisions[1];
        assert!(second.comment.is_empty());
        assert!(second.text.is_empty());
        assert_eq!(second.content_model, content_model::WIKITEXT);
        assert_eq!(second.title, "Q3");
    }

    #[test]
    fn test_malformed_page_is_skipped() {
        let bad = "<page><title>Broken</title><ns>0</ns><id>not-a-number</id>\
                   <revision><id>20</id><text>x</text></revision></page>";
        let xml = export(&format!(
            "{}\n{}\n{}",
            page(1, "Q1", &[(10, "{}")]),
            bad,
            page(3, "Q3", &[(30, "{}")])
        ));
        let mut collect = Collect::default();
        let stats = run(&xml, &mut collect).unwrap();

        let ids: Vec<u64> = collect.revisions.iter().map(|r| r.revision_id).collect();
        assert_eq!(ids, vec![10, 30]);
        assert_eq!(stats.pages_with_errors, 1);
        assert_eq!(stats.pages, 3);
    }

    #[test]
    fn test_mismatched_end_tag_is_contained_to_page() {
        let bad = "<page><title>Broken</title><ns>0</ns><id>2</id>\
                   <revision><id>20</id><text>x</txet></revision></page>";
        let unclosed = "<page><title>Unclosed</title><ns>0</ns><id>4</id></page>";
        let xml = export(&format!(
            "{}\n{}\n{}\n{}",
            page(1, "Q1", &[(10, "{}")]),
            bad,
            page(3, "Q3", &[(30, "{}")]),
            unclosed.replace("</title>", "")
        ));
        let mut collect = Collect::default();
        let stats = run(&xml, &mut collect).unwrap();

        let ids: Vec<u64> = collect.revisions.iter().map(|r| r.revision_id).collect();
        assert_eq!(ids, vec![10, 30]);
        assert_eq!(stats.pages_with_errors, 2);
    }

    #[test]
    fn test_unclosed_page_does_not_fail_dump() {
        let unclosed = page(2, "Q2", &[(20, "{}")]).replace("</page>", "");
        let xml = export(&format!(
            "{}\n{}\n{}\n{}",
            page(1, "Q1", &[(10, "{}")]),
            unclosed,
            page(3, "Q3", &[(30, "{}")]),
            page(4, "Q4", &[(40, "{}")])
        ));
        let mut collect = Collect::default();
        let stats = run(&xml, &mut collect).unwrap();

        let ids: Vec<u64> = collect.revisions.iter().map(|r| r.revision_id).collect();
        assert_eq!(ids, vec![10, 20, 40]);
        assert_eq!(stats.pages_with_errors, 1);
    }

    #[test]
    fn test_processor_failure_skips_page() {
        let xml = export(&format!(
            "{}\n{}",
            page(1, "Q1", &[(10, "{}"), (11, "{}")]),
            page(2, "Q2", &[(20, "{}")])
        ));
        let mut collect = Collect {
            fail_on: Some(10),
            ..Collect::default()
        };
        let stats = run(&xml, &mut collect).unwrap();

        let ids: Vec<u64> = collect.revisions.iter().map(|r| r.revision_id).collect();
        assert_eq!(ids, vec![20]);
        assert_eq!(stats.pages_with_errors, 1);
    }

    #[test]
    fn test_abort_is_not_recovered() {
        let xml = export(&format!(
            "{}\n{}",
            page(1, "Q1", &[(10, "{}")]),
            page(2, "Q2", &[(20, "{}")])
        ));
        let mut collect = Collect {
            abort_on: Some(10),
            ..Collect::default()
        };
        let err = run(&xml, &mut collect).unwrap_err();
        assert!(matches!(err, ExtractError::Aborted(_)));
        assert!(collect.revisions.is_empty());
    }

    #[test]
    fn test_missing_site_info_announces_empty_site() {
        let xml = format!("<mediawiki>\n{}\n</mediawiki>", page(1, "Q1", &[(10, "{}")]));
        let mut collect = Collect::default();
        run(&xml, &mut collect).unwrap();

        assert_eq!(collect.sites, vec![SiteInfo::default()]);
        assert_eq!(collect.revisions.len(), 1);
    }

    #[test]
    fn test_empty_export_still_starts_pass() {
        let mut collect = Collect::default();
        let stats = run(&export(""), &mut collect).unwrap();
        assert_eq!(collect.sites.len(), 1);
        assert_eq!(stats, ExtractStats::default());
    }

    #[test]
    fn test_truncated_stream_is_fatal() {
        let xml = export(&page(1, "Q1", &[(10, "{}")]));
        let cut = &xml[..xml.find("<text").unwrap()];
        let mut collect = Collect::default();
        let err = run(cut, &mut collect).unwrap_err();
        assert!(matches!(err, ExtractError::UnexpectedEof(_)));
    }
}
