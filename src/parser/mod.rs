//! Extraction of the data chess.com only publishes inside the inline scripts
//! of its HTML stats pages.

use crate::error::{CrawlerError, Result};
use crate::types::RatingPoint;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

/// Rating history of a live/daily/puzzle stats page.
pub fn parse_rating_history(html: &str) -> Result<Vec<RatingPoint>> {
    let key = key_pattern("ratings")?;
    for script in script_texts(html)? {
        let Some(m) = key.find(&script) else { continue };
        let value = match script_value(&script[m.end()..]) {
            Ok(v) => v,
            Err(e) => {
                debug!("ratings candidate rejected: {}", e);
                continue;
            }
        };
        if let Some(points) = value.as_array() {
            return points.iter().map(rating_point).collect();
        }
    }
    Err(CrawlerError::Malformed("no ratings series in stats page".into()))
}

/// Total games (wins + draws + losses) from the page's `chartData`.
pub fn parse_games_total(html: &str) -> Result<i64> {
    let key = key_pattern("chartData")?;
    for script in script_texts(html)? {
        let Some(m) = key.find(&script) else { continue };
        let chart = script_value(&script[m.end()..])?;
        let all = chart
            .get("all")
            .ok_or_else(|| CrawlerError::Malformed("chartData has no 'all' bucket".into()))?;
        let count = |name: &str| all.get(name).and_then(Value::as_i64).unwrap_or(0);
        return Ok(count("wins") + count("draws") + count("losses"));
    }
    Err(CrawlerError::Malformed("no chartData in stats page".into()))
}

/// Integer assigned to `name` in any inline script, e.g. `attemptCount: 1234`.
pub fn parse_counter(html: &str, name: &str) -> Result<i64> {
    let pattern = Regex::new(&format!(r"\b{}\s*[:=]\s*(\d+)", regex::escape(name)))
        .map_err(|e| CrawlerError::Malformed(e.to_string()))?;
    script_texts(html)?
        .iter()
        .find_map(|script| {
            pattern
                .captures(script)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<i64>().ok())
        })
        .ok_or_else(|| CrawlerError::Malformed(format!("no {name} in stats page")))
}

fn script_texts(html: &str) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("script")
        .map_err(|e| CrawlerError::Malformed(format!("invalid selector: {e:?}")))?;
    Ok(document
        .select(&selector)
        .map(|el| el.text().collect::<String>())
        .filter(|text| !text.trim().is_empty())
        .collect())
}

fn key_pattern(name: &str) -> Result<Regex> {
    Regex::new(&format!(r"\b{}\s*[:=]\s*", regex::escape(name)))
        .map_err(|e| CrawlerError::Malformed(e.to_string()))
}

/// Parses the JSON-ish value at the start of `rest`. Handles `JSON.parse('…')`
/// wrappers and object literals with bare keys.
fn script_value(rest: &str) -> Result<Value> {
    if let Some(arg) = rest.strip_prefix("JSON.parse(") {
        let literal = js_string_literal(arg.trim_start())
            .ok_or_else(|| CrawlerError::Malformed("unterminated JSON.parse literal".into()))?;
        return leading_json(&literal);
    }
    leading_json(rest).or_else(|_| leading_json(&quote_bare_keys(rest)?))
}

fn leading_json(text: &str) -> Result<Value> {
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(CrawlerError::Malformed(e.to_string())),
        None => Err(CrawlerError::Malformed("empty script value".into())),
    }
}

fn quote_bare_keys(text: &str) -> Result<String> {
    let bare = Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:")
        .map_err(|e| CrawlerError::Malformed(e.to_string()))?;
    Ok(bare.replace_all(text, "$1\"$2\":").into_owned())
}

/// Decodes a quoted JavaScript string starting at `input`'s first char.
fn js_string_literal(input: &str) -> Option<String> {
    let mut chars = input.chars();
    let quote = chars.next().filter(|c| *c == '\'' || *c == '"')?;
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            c if c == quote => return Some(out),
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'u' => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let decoded = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)?;
                    out.push(decoded);
                }
                other => out.push(other),
            },
            c => out.push(c),
        }
    }
    None
}

fn rating_point(value: &Value) -> Result<RatingPoint> {
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .ok_or_else(|| CrawlerError::Malformed(format!("rating point without {name}")))
    };
    Ok(RatingPoint {
        timestamp: field("timestamp")?,
        rating: field("rating")?,
    })
}
