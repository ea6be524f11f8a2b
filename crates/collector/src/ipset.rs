//! IP 평판 세트 -- 정확 일치 + CIDR 프리픽스 매칭, 원자적 교체
//!
//! 각 세트는 정확 일치 컬렉션과 프리픽스 길이별 마스킹 조회 구조를
//! 함께 가집니다. [`IpSetManager::reload`]는 쓰기 락 아래에서 전체
//! 매핑을 한 번에 교체하므로, 동시 [`IpSetManager::test_ip`] 호출이
//! 이전/새 세트가 섞인 상태를 관찰하는 일은 없습니다.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::RwLock;

use ipnetwork::IpNetwork;
use tracing::warn;

/// 단일 평판 세트
///
/// 정확한 IP 문자열 일치와 CIDR 포함 검사를 지원합니다.
#[derive(Debug, Default)]
pub struct IpSet {
    exact: HashSet<String>,
    // 프리픽스 길이 → 마스킹된 네트워크 주소 집합
    v4: HashMap<u8, HashSet<u32>>,
    v6: HashMap<u8, HashSet<u128>>,
}

impl IpSet {
    /// 빈 세트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// IP 또는 CIDR 항목을 추가합니다.
    ///
    /// CIDR 파싱에 실패한 항목은 로그를 남기고 무시합니다.
    pub fn add(&mut self, entry: &str) {
        if entry.contains('/') {
            match entry.parse::<IpNetwork>() {
                Ok(IpNetwork::V4(net)) => {
                    let masked = u32::from(net.network()) & u32::from(net.mask());
                    self.v4.entry(net.prefix()).or_default().insert(masked);
                }
                Ok(IpNetwork::V6(net)) => {
                    let masked = u128::from(net.network()) & u128::from(net.mask());
                    self.v6.entry(net.prefix()).or_default().insert(masked);
                }
                Err(e) => {
                    warn!(entry, error = %e, "skipping unparseable CIDR entry");
                }
            }
        } else {
            self.exact.insert(entry.to_owned());
        }
    }

    /// IP가 세트에 포함되는지 확인합니다.
    pub fn contains(&self, ip: &str) -> bool {
        if self.exact.contains(ip) {
            return true;
        }
        match ip.parse::<IpAddr>() {
            Ok(IpAddr::V4(addr)) => self.contains_v4(addr),
            Ok(IpAddr::V6(addr)) => self.contains_v6(addr),
            Err(_) => false,
        }
    }

    fn contains_v4(&self, addr: Ipv4Addr) -> bool {
        let raw = u32::from(addr);
        self.v4.iter().any(|(prefix, nets)| {
            let mask = if *prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            nets.contains(&(raw & mask))
        })
    }

    fn contains_v6(&self, addr: Ipv6Addr) -> bool {
        let raw = u128::from(addr);
        self.v6.iter().any(|(prefix, nets)| {
            let mask = if *prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            nets.contains(&(raw & mask))
        })
    }

    /// 등록된 항목 수 (정확 일치 + CIDR)
    pub fn len(&self) -> usize {
        self.exact.len()
            + self.v4.values().map(HashSet::len).sum::<usize>()
            + self.v6.values().map(HashSet::len).sum::<usize>()
    }

    /// 세트가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 이름 붙은 평판 세트들의 매니저
///
/// 읽기는 빈번하고 짧으며 (라인당 IP 검사), 쓰기는 드물지만
/// 대량입니다 (전체 세트 교체).
#[derive(Default)]
pub struct IpSetManager {
    sets: RwLock<HashMap<String, IpSet>>,
}

impl IpSetManager {
    /// 빈 매니저를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// IP를 모든 세트에 대해 검사합니다.
    ///
    /// (일치한 세트 이름, 일치하지 않은 세트 이름)을 정렬하여 반환합니다.
    pub fn test_ip(&self, ip: &str) -> (Vec<String>, Vec<String>) {
        let sets = self.sets.read().unwrap_or_else(|e| e.into_inner());
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();
        for (name, set) in sets.iter() {
            if set.contains(ip) {
                matched.push(name.clone());
            } else {
                unmatched.push(name.clone());
            }
        }
        matched.sort();
        unmatched.sort();
        (matched, unmatched)
    }

    /// 전체 세트 매핑을 원자적으로 교체합니다.
    ///
    /// 새 매핑은 락 밖에서 완전히 구성한 뒤 쓰기 락 아래에서
    /// 한 번의 대입으로 교체합니다.
    pub fn reload(&self, loaded: HashMap<String, Vec<String>>) {
        let mut fresh = HashMap::with_capacity(loaded.len());
        for (name, entries) in loaded {
            let mut set = IpSet::new();
            for entry in &entries {
                set.add(entry);
            }
            fresh.insert(name, set);
        }

        let mut sets = self.sets.write().unwrap_or_else(|e| e.into_inner());
        *sets = fresh;
    }

    /// 현재 구성된 세트 수를 반환합니다.
    pub fn set_count(&self) -> usize {
        self.sets.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
