//! GeoIP 인터페이스 -- 외부 지오로케이션 데이터베이스에 대한 좁은 추상화
//!
//! 실제 GeoIP 클라이언트는 이 저장소의 범위 밖입니다. 각 조회는
//! 독립적으로 실패할 수 있으며, 보강 엔진은 실패를 빈 문자열로
//! 우아하게 처리합니다.

use std::collections::HashMap;
use std::net::IpAddr;

/// GeoIP 조회 실패
#[derive(Debug, thiserror::Error)]
#[error("geoip lookup failed: {0}")]
pub struct GeoIpError(pub String);

/// GeoIP 리졸버 인터페이스
pub trait GeoIpResolver: Send + Sync {
    /// IP의 ASN 문자열을 반환합니다 (예: "AS13335 Cloudflare, Inc.").
    fn asn(&self, ip: IpAddr) -> Result<String, GeoIpError>;

    /// IP의 도시 이름을 반환합니다.
    fn city(&self, ip: IpAddr) -> Result<String, GeoIpError>;

    /// IP의 국가 이름을 반환합니다.
    fn country(&self, ip: IpAddr) -> Result<String, GeoIpError>;
}

/// 고정 테이블 기반 리졸버 (테스트/로컬 실행용)
#[derive(Default)]
pub struct StaticGeoIp {
    asn: HashMap<IpAddr, String>,
    city: HashMap<IpAddr, String>,
    country: HashMap<IpAddr, String>,
}

impl StaticGeoIp {
    /// 빈 리졸버를 생성합니다. 모든 조회가 실패합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// IP의 ASN/도시/국가 항목을 등록합니다.
    pub fn with_entry(
        mut self,
        ip: IpAddr,
        asn: impl Into<String>,
        city: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        self.asn.insert(ip, asn.into());
        self.city.insert(ip, city.into());
        self.country.insert(ip, country.into());
        self
    }
}

impl GeoIpResolver for StaticGeoIp {
    fn asn(&self, ip: IpAddr) -> Result<String, GeoIpError> {
        self.asn
            .get(&ip)
            .cloned()
            .ok_or_else(|| GeoIpError(format!("no ASN entry for {ip}")))
    }

    fn city(&self, ip: IpAddr) -> Result<String, GeoIpError> {
        self.city
            .get(&ip)
            .cloned()
            .ok_or_else(|| GeoIpError(format!("no city entry for {ip}")))
    }

    fn country(&self, ip: IpAddr) -> Result<String, GeoIpError> {
        self.country
            .get(&ip)
            .cloned()
            .ok_or_else(|| GeoIpError(format!("no country entry for {ip}")))
    }
}
