use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use quick_xml::{Reader, Writer};

use super::{MessageParser, ParseError, ParsedMessage};

const DATE_ELEMENT: &str = "toestandsdatum";
const SEQUENCE_ELEMENT: &str = "volgnummer";
const OBJECT_REF_ELEMENT: &str = "identificatie";

/// Parser for BRK snapshot messages.
///
/// Element names are matched on their local name, so any namespace prefix is
/// accepted. The first occurrence of each element wins. Its value is the
/// trimmed concatenation of all text, entity references and CDATA inside it.
pub struct SnapshotXmlParser;

#[derive(Debug, Clone, Copy)]
enum Field {
    Date,
    Sequence,
    ObjectRef,
}

impl Field {
    fn for_element(local_name: &[u8]) -> Option<Self> {
        match local_name {
            n if n == DATE_ELEMENT.as_bytes() => Some(Field::Date),
            n if n == SEQUENCE_ELEMENT.as_bytes() => Some(Field::Sequence),
            n if n == OBJECT_REF_ELEMENT.as_bytes() => Some(Field::ObjectRef),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Fields {
    date: Option<String>,
    sequence: Option<String>,
    object_ref: Option<String>,
}

impl Fields {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Date => &mut self.date,
            Field::Sequence => &mut self.sequence,
            Field::ObjectRef => &mut self.object_ref,
        }
    }
}

/// Text collected for a field element until its end tag.
struct Capture {
    field: Field,
    depth: usize,
    text: String,
}

impl MessageParser for SnapshotXmlParser {
    fn parse(&self, content: &str) -> Result<ParsedMessage, ParseError> {
        if content.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut reader = Reader::from_str(content);
        let mut writer = Writer::new(Vec::new());

        let mut open: Vec<String> = Vec::new();
        let mut root_seen = false;
        let mut fields = Fields::default();
        let mut capture: Option<Capture> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|source| xml_error(&reader, source))?;

            match event {
                Event::Start(e) => {
                    root_seen = true;
                    let local_name = e.local_name();
                    open.push(String::from_utf8_lossy(local_name.as_ref()).to_string());
                    if capture.is_none() {
                        if let Some(field) = Field::for_element(local_name.as_ref()) {
                            if fields.slot(field).is_none() {
                                capture = Some(Capture {
                                    field,
                                    depth: open.len(),
                                    text: String::new(),
                                });
                            }
                        }
                    }
                    write(&mut writer, Event::Start(e))?;
                }
                Event::End(e) => {
                    if capture.as_ref().is_some_and(|c| c.depth == open.len()) {
                        if let Some(done) = capture.take() {
                            *fields.slot(done.field) = Some(done.text.trim().to_string());
                        }
                    }
                    open.pop();
                    write(&mut writer, Event::End(e))?;
                }
                Event::Empty(e) => {
                    root_seen = true;
                    write(&mut writer, Event::Empty(e))?;
                }
                Event::Text(e) => {
                    let text = e.decode().map_err(|source| xml_error(&reader, source))?;
                    if let Some(capture) = capture.as_mut() {
                        capture.text.push_str(&text);
                    }
                    // whitespace between elements is not part of the normalized form
                    if !text.trim().is_empty() {
                        write(&mut writer, Event::Text(e))?;
                    }
                }
                Event::GeneralRef(e) => {
                    if let Some(capture) = capture.as_mut() {
                        let resolved = resolve_reference(&reader, &e)?;
                        capture.text.push_str(&resolved);
                    }
                    write(&mut writer, Event::GeneralRef(e))?;
                }
                Event::CData(e) => {
                    if let Some(capture) = capture.as_mut() {
                        let text = e.decode().map_err(|source| xml_error(&reader, source))?;
                        capture.text.push_str(&text);
                    }
                    write(&mut writer, Event::CData(e))?;
                }
                // Declarations, comments and processing instructions are
                // dropped from the normalized content.
                Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if let Some(unclosed) = open.pop() {
            return Err(ParseError::Unclosed(unclosed));
        }
        if !root_seen {
            return Err(ParseError::NoRootElement);
        }

        let message_date = fields.date.map(|d| parse_date(&d)).transpose()?;

        let sequence_text = fields
            .sequence
            .ok_or(ParseError::MissingElement(SEQUENCE_ELEMENT))?;
        let sequence_number = sequence_text
            .parse::<i64>()
            .map_err(|source| ParseError::InvalidSequence {
                value: sequence_text.clone(),
                source,
            })?;

        let normalized_content = String::from_utf8(writer.into_inner())
            .map_err(|e| ParseError::Write(e.to_string()))?;

        Ok(ParsedMessage {
            message_date,
            normalized_content,
            sequence_number,
            object_ref: fields.object_ref.filter(|r| !r.is_empty()),
        })
    }
}

fn xml_error(reader: &Reader<&[u8]>, source: impl Into<quick_xml::Error>) -> ParseError {
    ParseError::Xml {
        position: reader.buffer_position(),
        source: source.into(),
    }
}

/// Character references and the five predefined XML entities.
fn resolve_reference(reader: &Reader<&[u8]>, reference: &BytesRef<'_>) -> Result<String, ParseError> {
    if let Some(ch) = reference
        .resolve_char_ref()
        .map_err(|source| xml_error(reader, source))?
    {
        return Ok(ch.to_string());
    }
    let name = reference
        .decode()
        .map_err(|source| xml_error(reader, source))?;
    resolve_predefined_entity(&name)
        .map(str::to_string)
        .ok_or_else(|| ParseError::UnknownEntity(name.to_string()))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ParseError> {
    writer
        .write_event(event)
        .map_err(|e| ParseError::Write(e.to_string()))
}

/// Accepts a plain date (`2024-01-31`) or a full RFC 3339 timestamp.
fn parse_date(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|source| {
        ParseError::InvalidDate {
            value: value.to_string(),
            source,
        }
    })?;
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    Ok(Utc.from_utc_datetime(&midnight))
}
