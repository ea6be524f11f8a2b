//! Zeek 로그 파서 -- TSV 헤더 블록과 타입별 필드 변환
//!
//! Zeek TSV 파일은 8줄의 헤더 블록으로 시작합니다:
//! `#separator`, `#set_separator`, `#empty_field`, `#unset_field`,
//! `#path`, `#open`, `#fields`, `#types`.
//! `#separator` 지시문이 없으면 파일은 이미 라인 단위 JSON이며,
//! 각 라인은 형식 유효성만 검증합니다.
//!
//! # 타입 변환 규칙
//! - `time` → Unix 초+소수에서 RFC3339 (UTC), `timestamp` 키로 저장
//! - `port` / `count` / `int` → 정수 (실패 시 원본 문자열)
//! - `interval` / `double` → 실수 (실패 시 원본 문자열)
//! - `bool` → 불리언 `T`/`F` (실패 시 원본 문자열)
//! - `set[...]` → set 구분자로 분리, unset/empty 센티넬은 빈 배열
//! - 그 외 → 문자열, unset 센티넬은 null

use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::IngestError;

/// TSV 헤더 블록의 고정 라인 수
pub const HEADER_LINES: usize = 8;

/// Zeek TSV 파일 헤더
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeekHeader {
    /// 컬럼 구분자
    pub separator: String,
    /// set 값 구분자
    pub set_separator: String,
    /// 빈 필드 센티넬
    pub empty_field: String,
    /// 미설정 필드 센티넬
    pub unset_field: String,
    /// 필드 이름 목록
    pub fields: Vec<String>,
    /// 필드 타입 목록
    pub types: Vec<String>,
}

impl ZeekHeader {
    /// 헤더 블록 라인에서 헤더를 파싱합니다.
    ///
    /// 첫 라인에 `#separator` 지시문이 없거나 블록이 불완전하면
    /// `None`을 반환합니다 (JSON 모드).
    pub fn parse(lines: &[String]) -> Option<Self> {
        if lines.len() < HEADER_LINES || !lines[0].starts_with("#separator") {
            return None;
        }

        // "#separator \x09" — 구분자는 \xHH 이스케이프로 기록됨
        let sep_token = lines[0].split(' ').nth(1)?;
        let hex = sep_token.strip_prefix("\\x")?;
        let code = u32::from_str_radix(hex, 16).ok()?;
        let separator = char::from_u32(code)?.to_string();

        let set_separator = lines[1].split(&separator).nth(1)?.to_owned();
        let empty_field = lines[2].split(&separator).nth(1)?.to_owned();
        let unset_field = lines[3].split(&separator).nth(1)?.to_owned();

        // #fields / #types는 첫 컬럼(지시문)을 제외
        let fields: Vec<String> = lines[6]
            .split(&separator)
            .skip(1)
            .map(str::to_owned)
            .collect();
        let types: Vec<String> = lines[7]
            .split(&separator)
            .skip(1)
            .map(str::to_owned)
            .collect();
        if fields.is_empty() || fields.len() != types.len() {
            return None;
        }

        Some(Self {
            separator,
            set_separator,
            empty_field,
            unset_field,
            fields,
            types,
        })
    }
}

/// 로그 엔트리 한 줄을 JSON 바이트로 파싱합니다.
///
/// 헤더가 있으면 TSV를 JSON으로 변환하고, 없으면 JSON 형식만 검증합니다.
pub fn parse_line(entry: &str, header: Option<&ZeekHeader>) -> Result<Vec<u8>, IngestError> {
    match header {
        None => validate_json(entry),
        Some(h) => process_tsv(entry, h),
    }
}

/// JSON 라인의 형식 유효성을 검증하고 바이트로 반환합니다.
fn validate_json(entry: &str) -> Result<Vec<u8>, IngestError> {
    match serde_json::from_str::<serde::de::IgnoredAny>(entry) {
        Ok(_) => Ok(entry.as_bytes().to_vec()),
        Err(_) => Err(IngestError::BadJson),
    }
}

/// TSV 라인을 선언된 타입에 따라 JSON 객체로 변환합니다.
fn process_tsv(entry: &str, h: &ZeekHeader) -> Result<Vec<u8>, IngestError> {
    let columns: Vec<&str> = entry.split(&h.separator).collect();
    if columns.len() > h.fields.len() {
        return Err(IngestError::BadTsv(format!(
            "{} columns for {} declared fields",
            columns.len(),
            h.fields.len()
        )));
    }

    let mut data = Map::new();
    for (i, column) in columns.iter().enumerate() {
        let field = &h.fields[i];
        let field_type = h.types[i].as_str();

        // set 타입의 unset/empty 센티넬은 빈 배열
        if field_type.contains("set") && (*column == h.unset_field || *column == h.empty_field) {
            data.insert(field.clone(), Value::Array(Vec::new()));
            continue;
        }

        match field_type {
            "time" => {
                if let Ok(ts) = column.parse::<f64>()
                    && let Some(formatted) = format_unix_timestamp(ts)
                {
                    data.insert("timestamp".to_owned(), Value::String(formatted));
                }
            }
            "port" | "count" | "int" => match column.parse::<i64>() {
                Ok(val) => {
                    data.insert(field.clone(), Value::from(val));
                }
                Err(_) => {
                    data.insert(field.clone(), Value::String((*column).to_owned()));
                }
            },
            "interval" | "double" => match column.parse::<f64>() {
                Ok(val) if serde_json::Number::from_f64(val).is_some() => {
                    data.insert(field.clone(), Value::from(val));
                }
                _ => {
                    data.insert(field.clone(), Value::String((*column).to_owned()));
                }
            },
            "bool" => match *column {
                "T" | "t" | "true" | "1" => {
                    data.insert(field.clone(), Value::Bool(true));
                }
                "F" | "f" | "false" | "0" => {
                    data.insert(field.clone(), Value::Bool(false));
                }
                _ => {
                    data.insert(field.clone(), Value::String((*column).to_owned()));
                }
            },
            t if t.starts_with("set[") => {
                let parts: Vec<Value> = column
                    .split(&h.set_separator)
                    .map(|p| Value::String(p.to_owned()))
                    .collect();
                data.insert(field.clone(), Value::Array(parts));
            }
            _ => {
                if *column == h.unset_field {
                    data.insert(field.clone(), Value::Null);
                } else {
                    data.insert(field.clone(), Value::String((*column).to_owned()));
                }
            }
        }

        // 숫자/불리언 파싱 폴백으로 남은 unset 센티넬을 null로 정리
        if data.get(field) == Some(&Value::String(h.unset_field.clone())) {
            data.insert(field.clone(), Value::Null);
        }
    }

    serde_json::to_vec(&Value::Object(data)).map_err(|e| {
        debug!(error = %e, "failed to serialize parsed line");
        IngestError::BadTsv(e.to_string())
    })
}

/// Unix 초+소수 타임스탬프를 RFC3339 (UTC, `Z`) 문자열로 변환합니다.
fn format_unix_timestamp(ts: f64) -> Option<String> {
    let secs = ts.trunc() as i64;
    let nanos = (ts.fract() * 1e9).round() as u32;
    let dt = DateTime::from_timestamp(secs, nanos)?;
    Some(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}
