//! Bing-style attribution loader and its streaming XML parser (§4.10).
//!
//! Grounded on `bingmapsource.cpp`'s `bstart_element`/`btext` GMarkupParser
//! callbacks: a small state machine keyed by the element stack, reimplemented
//! over `quick_xml::Reader` instead of a GLib SAX parser. No DOM is built.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::projection::BBox;

/// One `<CoverageArea>` record: the attribution text in scope when it was
/// opened, plus its zoom range and bounding box.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attribution {
    pub text: String,
    pub zoom_min: i32,
    pub zoom_max: i32,
    pub bounds: BBox,
}

/// Parses a Bing imagery metadata XML document into zero or more
/// `Attribution` records. Unknown elements are ignored; malformed XML
/// yields whatever was parsed before the error (mirroring the original,
/// which has no retry/rollback on parse failure either -- see
/// DESIGN.md Open Question 3).
pub fn parse_attributions(xml: &str) -> Vec<Attribution> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut attributions = Vec::new();
    let mut current_text: Option<String> = None;
    let mut element_stack: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "CoverageArea" {
                    attributions.push(Attribution {
                        text: current_text.clone().unwrap_or_default(),
                        ..Default::default()
                    });
                }
                element_stack.push(name);
            }
            Ok(Event::End(_)) => {
                element_stack.pop();
            }
            Ok(Event::Text(e)) => {
                let Ok(text) = e.unescape() else {
                    continue;
                };
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let element = element_stack.last().cloned().unwrap_or_default();
                let parent = if element_stack.len() > 1 {
                    element_stack.get(element_stack.len() - 2).cloned()
                } else {
                    None
                };

                if element == "Attribution" {
                    current_text = Some(text);
                } else if let Some(last) = attributions.last_mut() {
                    if parent.as_deref() == Some("CoverageArea") {
                        match element.as_str() {
                            "ZoomMin" => last.zoom_min = text.parse().unwrap_or(0),
                            "ZoomMax" => last.zoom_max = text.parse().unwrap_or(0),
                            _ => {}
                        }
                    } else if parent.as_deref() == Some("BoundingBox") {
                        match element.as_str() {
                            "SouthLatitude" => last.bounds.min_lat = text.parse().unwrap_or(0.0),
                            "WestLongitude" => last.bounds.min_lon = text.parse().unwrap_or(0.0),
                            "NorthLatitude" => last.bounds.max_lat = text.parse().unwrap_or(0.0),
                            "EastLongitude" => last.bounds.max_lon = text.parse().unwrap_or(0.0),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    attributions
}
