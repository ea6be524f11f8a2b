//! 보강 엔진 -- GeoIP 주입, 평판 검사, 알람 파생
//!
//! 호출마다 상태가 없으며 동시 호출에 안전합니다. 라인을 일반 필드
//! 맵으로 파싱하고, `timestamp` 필드가 RFC3339로 파싱되지 않으면 입력을
//! 그대로 반환합니다 (타임스탬프 없음 신호). `.`을 포함한 키는 저장
//! 엔진 제약에 맞춰 `_`로 재작성됩니다.
//!
//! 설정된 출발지/목적지 IP 필드 각각에 대해 ASN/도시/국가를 독립적으로
//! 조회하고 (실패 → 빈 문자열) 평판 세트를 검사합니다. 어느 한쪽이라도
//! 세트에 일치하면 원본 필드에 일치/불일치 세트 이름 배열 4개를 더한
//! 알람 문서를 추가로 생성합니다.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};

use watchpost_core::config::EnrichConfig;

use crate::geoip::GeoIpResolver;
use crate::ipset::IpSetManager;

/// 보강 결과
#[derive(Debug, Clone)]
pub struct Enrichment {
    /// 보강된 (또는 파싱 불가 시 원본 그대로의) JSON 바이트
    pub data: Vec<u8>,
    /// 레코드의 타임스탬프. 없으면 호출자가 벽시계 날짜로 대체합니다.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// 평판 세트 일치 시 생성되는 알람 문서
    pub alarm: Option<Vec<u8>>,
}

/// 보강 엔진
pub struct Enricher {
    geoip: Arc<dyn GeoIpResolver>,
    reputation: Arc<IpSetManager>,
    source_ip_field: String,
    dest_ip_field: String,
}

impl Enricher {
    /// 새 보강 엔진을 생성합니다.
    pub fn new(
        geoip: Arc<dyn GeoIpResolver>,
        reputation: Arc<IpSetManager>,
        config: &EnrichConfig,
    ) -> Self {
        Self {
            geoip,
            reputation,
            source_ip_field: config.source_ip_field.clone(),
            dest_ip_field: config.dest_ip_field.clone(),
        }
    }

    /// 한 라인을 보강합니다.
    ///
    /// JSON으로 파싱되지 않거나 유효한 `timestamp`가 없으면 입력이
    /// 변경 없이 반환됩니다.
    pub fn enrich(&self, raw: &[u8]) -> Enrichment {
        let unchanged = || Enrichment {
            data: raw.to_vec(),
            timestamp: None,
            alarm: None,
        };

        let Ok(Value::Object(mut payload)) = serde_json::from_slice::<Value>(raw) else {
            return unchanged();
        };

        // RFC3339 타임스탬프 확인
        let Some(Value::String(ts_str)) = payload.get("timestamp") else {
            return unchanged();
        };
        let Ok(timestamp) = DateTime::parse_from_rfc3339(ts_str) else {
            return unchanged();
        };

        // 저장 엔진 키 제약: "."을 "_"로 재작성
        rewrite_dotted_keys(&mut payload);

        // 출발지/목적지 IP 보강 + 평판 검사
        let source_hits = self.enrich_ip_role(&mut payload, &self.source_ip_field);
        let dest_hits = self.enrich_ip_role(&mut payload, &self.dest_ip_field);

        // 어느 한 역할이라도 일치하면 알람 문서 생성
        let alarm = if matched_any(&source_hits, &dest_hits) {
            Some(self.build_alarm(&payload, &source_hits, &dest_hits))
        } else {
            None
        };

        let data = serde_json::to_vec(&Value::Object(payload)).unwrap_or_else(|_| raw.to_vec());

        Enrichment {
            data,
            timestamp: Some(timestamp),
            alarm,
        }
    }

    /// 단일 IP 역할 필드를 보강하고 (일치, 불일치) 세트 이름을 반환합니다.
    ///
    /// 필드가 없거나 문자열이 아니면 `None`을 반환합니다.
    fn enrich_ip_role(
        &self,
        payload: &mut Map<String, Value>,
        field: &str,
    ) -> Option<(Vec<String>, Vec<String>)> {
        let Some(Value::String(ip_str)) = payload.get(field) else {
            return None;
        };
        let ip_str = ip_str.clone();

        // 각 조회는 독립적으로 실패 가능 (실패 → 빈 문자열)
        let parsed: Option<IpAddr> = ip_str.parse().ok();
        let asn = parsed
            .and_then(|ip| self.geoip.asn(ip).ok())
            .unwrap_or_default();
        let city = parsed
            .and_then(|ip| self.geoip.city(ip).ok())
            .unwrap_or_default();
        let country = parsed
            .and_then(|ip| self.geoip.country(ip).ok())
            .unwrap_or_default();

        payload.insert(format!("{field}_asn"), Value::String(asn));
        payload.insert(format!("{field}_city"), Value::String(city));
        payload.insert(format!("{field}_country"), Value::String(country));

        Some(self.reputation.test_ip(&ip_str))
    }

    /// 원본 필드 + 역할별 일치/불일치 배열 4개로 알람 문서를 생성합니다.
    fn build_alarm(
        &self,
        payload: &Map<String, Value>,
        source_hits: &Option<(Vec<String>, Vec<String>)>,
        dest_hits: &Option<(Vec<String>, Vec<String>)>,
    ) -> Vec<u8> {
        let mut alarm = payload.clone();
        let empty = (Vec::new(), Vec::new());
        let (src_pos, src_neg) = source_hits.as_ref().unwrap_or(&empty);
        let (dst_pos, dst_neg) = dest_hits.as_ref().unwrap_or(&empty);

        alarm.insert(
            format!("{}_pos", self.source_ip_field),
            string_array(src_pos),
        );
        alarm.insert(
            format!("{}_neg", self.source_ip_field),
            string_array(src_neg),
        );
        alarm.insert(format!("{}_pos", self.dest_ip_field), string_array(dst_pos));
        alarm.insert(format!("{}_neg", self.dest_ip_field), string_array(dst_neg));

        serde_json::to_vec(&Value::Object(alarm)).unwrap_or_default()
    }
}

/// "."을 포함한 키를 "_"로 재작성합니다.
fn rewrite_dotted_keys(payload: &mut Map<String, Value>) {
    let dotted: Vec<String> = payload
        .keys()
        .filter(|k| k.contains('.'))
        .cloned()
        .collect();
    for key in dotted {
        if let Some(value) = payload.remove(&key) {
            payload.insert(key.replace('.', "_"), value);
        }
    }
}

fn string_array(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

/// 어느 역할이라도 하나 이상의 세트에 일치했는지 확인합니다.
fn matched_any(
    source_hits: &Option<(Vec<String>, Vec<String>)>,
    dest_hits: &Option<(Vec<String>, Vec<String>)>,
) -> bool {
    source_hits.as_ref().is_some_and(|(pos, _)| !pos.is_empty())
        || dest_hits.as_ref().is_some_and(|(pos, _)| !pos.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::StaticGeoIp;
    use std::collections::HashMap;

    fn enricher_with(
        geoip: StaticGeoIp,
        sets: &[(&str, &[&str])],
    ) -> (Enricher, Arc<IpSetManager>) {
        let manager = Arc::new(IpSetManager::new());
        let loaded = sets
            .iter()
            .map(|(name, entries)| {
                (
                    (*name).to_owned(),
                    entries.iter().map(|e| (*e).to_owned()).collect(),
                )
            })
            .collect::<HashMap<_, _>>();
        manager.reload(loaded);
        let enricher = Enricher::new(
            Arc::new(geoip),
            Arc::clone(&manager),
            &EnrichConfig::default(),
        );
        (enricher, manager)
    }

    fn parse(data: &[u8]) -> Value {
        serde_json::from_slice(data).unwrap()
    }

    #[test]
    fn unparseable_json_bypasses_enrichment() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[]);
        let raw = b"not json at all";
        let result = enricher.enrich(raw);
        assert_eq!(result.data, raw.to_vec());
        assert!(result.timestamp.is_none());
        assert!(result.alarm.is_none());
    }

    #[test]
    fn missing_timestamp_returns_unchanged() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[]);
        let raw = br#"{"id_orig_h":"10.0.0.1"}"#;
        let result = enricher.enrich(raw);
        assert_eq!(result.data, raw.to_vec());
        assert!(result.timestamp.is_none());
    }

    #[test]
    fn invalid_timestamp_returns_unchanged() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[]);
        let raw = br#"{"timestamp":"yesterday","id_orig_h":"10.0.0.1"}"#;
        let result = enricher.enrich(raw);
        assert_eq!(result.data, raw.to_vec());
        assert!(result.timestamp.is_none());
    }

    #[test]
    fn geo_fields_injected_per_role() {
        let src: IpAddr = "192.168.1.1".parse().unwrap();
        let geoip = StaticGeoIp::new().with_entry(src, "AS64500 Example", "Hamilton", "Canada");
        let (enricher, _) = enricher_with(geoip, &[]);

        let raw = br#"{"timestamp":"2024-01-15T12:00:00Z","id_orig_h":"192.168.1.1","id_resp_h":"10.0.0.2"}"#;
        let result = enricher.enrich(raw);
        let value = parse(&result.data);

        assert_eq!(value["id_orig_h_asn"], "AS64500 Example");
        assert_eq!(value["id_orig_h_city"], "Hamilton");
        assert_eq!(value["id_orig_h_country"], "Canada");
        // 등록되지 않은 목적지 IP는 빈 문자열로 우아하게 처리
        assert_eq!(value["id_resp_h_asn"], "");
        assert_eq!(value["id_resp_h_city"], "");
        assert_eq!(value["id_resp_h_country"], "");
        assert!(result.timestamp.is_some());
    }

    #[test]
    fn dotted_keys_rewritten() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[]);
        let raw = br#"{"timestamp":"2024-01-15T12:00:00Z","id.orig_h":"10.0.0.1","id.orig_p":80}"#;
        let result = enricher.enrich(raw);
        let value = parse(&result.data);
        assert!(value.get("id.orig_h").is_none());
        assert_eq!(value["id_orig_h"], "10.0.0.1");
        assert_eq!(value["id_orig_p"], 80);
        // 재작성된 키가 보강 대상 필드로 인식됨
        assert!(value.get("id_orig_h_asn").is_some());
    }

    #[test]
    fn alarm_emitted_when_source_matches() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[("badguys", &["10.0.1.0/24"])]);
        let raw =
            br#"{"timestamp":"2024-01-15T12:00:00Z","id_orig_h":"10.0.1.53","id_resp_h":"8.8.8.8"}"#;
        let result = enricher.enrich(raw);
        let alarm = parse(&result.alarm.expect("alarm document"));

        assert_eq!(alarm["id_orig_h_pos"], serde_json::json!(["badguys"]));
        assert_eq!(alarm["id_orig_h_neg"], serde_json::json!([]));
        assert_eq!(alarm["id_resp_h_pos"], serde_json::json!([]));
        assert_eq!(alarm["id_resp_h_neg"], serde_json::json!(["badguys"]));
        // 알람은 원본 필드의 상위 집합
        assert_eq!(alarm["id_orig_h"], "10.0.1.53");
    }

    #[test]
    fn alarm_emitted_when_dest_matches() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[("badguys", &["8.8.8.8"])]);
        let raw =
            br#"{"timestamp":"2024-01-15T12:00:00Z","id_orig_h":"10.0.0.1","id_resp_h":"8.8.8.8"}"#;
        let result = enricher.enrich(raw);
        assert!(result.alarm.is_some());
    }

    #[test]
    fn no_alarm_when_nothing_matches() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[("badguys", &["203.0.113.0/24"])]);
        let raw =
            br#"{"timestamp":"2024-01-15T12:00:00Z","id_orig_h":"10.0.0.1","id_resp_h":"8.8.8.8"}"#;
        let result = enricher.enrich(raw);
        assert!(result.alarm.is_none());
        // 데이터 문서에는 평판 배열이 포함되지 않음
        let value = parse(&result.data);
        assert!(value.get("id_orig_h_pos").is_none());
    }

    #[test]
    fn record_without_ip_fields_keeps_timestamp() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[("s", &["10.0.0.1"])]);
        let raw = br#"{"timestamp":"2024-01-15T12:00:00Z","query":"example.com"}"#;
        let result = enricher.enrich(raw);
        assert!(result.timestamp.is_some());
        assert!(result.alarm.is_none());
        let value = parse(&result.data);
        assert!(value.get("id_orig_h_asn").is_none());
    }

    #[test]
    fn non_string_ip_field_ignored() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[]);
        let raw = br#"{"timestamp":"2024-01-15T12:00:00Z","id_orig_h":42}"#;
        let result = enricher.enrich(raw);
        let value = parse(&result.data);
        assert!(value.get("id_orig_h_asn").is_none());
    }

    #[test]
    fn concurrent_enrichment_is_safe() {
        let (enricher, _) = enricher_with(StaticGeoIp::new(), &[("s", &["10.0.0.0/8"])]);
        let enricher = Arc::new(enricher);
        let raw = br#"{"timestamp":"2024-01-15T12:00:00Z","id_orig_h":"10.1.2.3"}"#.to_vec();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let enricher = Arc::clone(&enricher);
                let raw = raw.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let result = enricher.enrich(&raw);
                        assert!(result.alarm.is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
