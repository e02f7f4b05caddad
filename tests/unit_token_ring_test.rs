use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use zircon::core::cluster::host::{Host, HostInfo, HostRef};
use zircon::core::cluster::ring::{ReplicaMap, ReplicationStrategy, TokenRing};
use zircon::core::cluster::token::{
    ByteOrderedTokenizer, Murmur3Tokenizer, RandomTokenizer, Token, Tokenizer,
    tokenizer_for_partitioner,
};
use zircon::core::errors::ZirconError;

/// Test tokenizer: the token is the key's first byte, parsed tokens are
/// decimal strings.
#[derive(Debug)]
struct FirstByteTokenizer;

impl Tokenizer for FirstByteTokenizer {
    fn hash(&self, routing_key: &[u8]) -> Token {
        Token::Murmur(routing_key.first().copied().unwrap_or(0) as i64)
    }

    fn parse(&self, s: &str) -> Result<Token, ZirconError> {
        Ok(Token::Murmur(s.parse().unwrap()))
    }
}

fn host(index: u8, dc: &str, rack: &str, tokens: &[&str]) -> HostRef {
    let addr: SocketAddr = format!("10.0.0.{index}:9042").parse().unwrap();
    let host = Host::new(addr, addr, false);
    host.update_info(HostInfo {
        host_id: None,
        datacenter: Some(dc.to_owned()),
        rack: Some(rack.to_owned()),
        tokens: tokens.iter().map(|t| (*t).to_owned()).collect(),
        release_version: None,
        schema_version: None,
    });
    Arc::new(host)
}

fn addr_of(host: &HostRef) -> u8 {
    match host.address() {
        SocketAddr::V4(v4) => v4.ip().octets()[3],
        _ => unreachable!(),
    }
}

// --- Murmur3, vectors cross-checked against the server's partitioner ---

#[test]
fn test_murmur3_known_tokens() {
    let tokenizer = Murmur3Tokenizer;
    for (key, expected) in [
        (&b"test"[..], -6017608668500074083i64),
        (b"key1", 1573573083296714675),
        (b"foo", -2129773440516405919),
        (b"", 0),
        (b"a", -8839064797231613815),
        (b"abcdefghijklmnop", -4266531025627334877),
        (b"abcdefghijklmnopq", 8459014091212432983),
        (b"0123456789abcdef0123456789abcdef", 5708918040068455610),
        (b"zircon", -7056041347794868231),
    ] {
        assert_eq!(
            tokenizer.hash(key),
            Token::Murmur(expected),
            "token of {key:?}"
        );
    }
}

#[test]
fn test_murmur3_signed_tail_bytes() {
    // Keys with high-bit bytes exercise the Java signed-byte semantics that
    // distinguish the partitioner from standard murmur3.
    let tokenizer = Murmur3Tokenizer;
    assert_eq!(
        tokenizer.hash(&[0xff, 0x00, 0x80, 0x7f]),
        Token::Murmur(-322618467450875193)
    );
}

#[test]
fn test_murmur3_parse() {
    let tokenizer = Murmur3Tokenizer;
    assert_eq!(
        tokenizer.parse("-9223372036854775808").unwrap(),
        Token::Murmur(i64::MIN)
    );
    assert!(tokenizer.parse("not-a-token").is_err());
}

#[test]
fn test_random_partitioner_known_tokens() {
    let tokenizer = RandomTokenizer;
    for (key, expected) in [
        (&b"test"[..], 12707736894140473154801792860916528374u128),
        (b"a", 16955237001963240173058271559858726497),
        (b"zircon", 81370456058342341081237784921784788566),
    ] {
        assert_eq!(tokenizer.hash(key), Token::Random(expected));
    }
}

#[test]
fn test_byte_ordered_tokens_compare_lexicographically() {
    let tokenizer = ByteOrderedTokenizer;
    let a = tokenizer.hash(b"apple");
    let b = tokenizer.hash(b"banana");
    assert!(a < b);
    assert_eq!(tokenizer.parse("0a0b").unwrap(), Token::Bytes(vec![0x0a, 0x0b]));
}

#[test]
fn test_tokenizer_selection_from_partitioner_string() {
    assert!(tokenizer_for_partitioner("org.apache.cassandra.dht.Murmur3Partitioner").is_ok());
    assert!(tokenizer_for_partitioner("org.apache.cassandra.dht.RandomPartitioner").is_ok());
    assert!(tokenizer_for_partitioner("org.apache.cassandra.dht.ByteOrderedPartitioner").is_ok());
    assert!(tokenizer_for_partitioner("com.example.WeirdPartitioner").is_err());
}

// --- Ring search and replica placement ---

fn six_host_ring() -> (Arc<TokenRing>, Vec<HostRef>) {
    let hosts: Vec<HostRef> = (0u8..6)
        .map(|i| {
            let token = i.to_string();
            host(i, "dc1", "r1", &[token.as_str()])
        })
        .collect();
    let ring = Arc::new(TokenRing::build(&hosts, &FirstByteTokenizer));
    (ring, hosts)
}

#[test]
fn test_ring_binary_search_with_wraparound() {
    let (ring, _) = six_host_ring();
    assert_eq!(ring.len(), 6);
    assert_eq!(addr_of(&ring.primary(&Token::Murmur(3)).unwrap()), 3);
    // Between 3 and 4 the next entry owns the token.
    assert_eq!(addr_of(&ring.primary(&Token::Murmur(4)).unwrap()), 4);
    // Past the last token wraps to the first.
    assert_eq!(addr_of(&ring.primary(&Token::Murmur(99)).unwrap()), 0);
}

#[test]
fn test_simple_strategy_takes_next_distinct_hosts_clockwise() {
    let (ring, _) = six_host_ring();
    let map = ReplicaMap::build(
        ring,
        &ReplicationStrategy::Simple {
            replication_factor: 3,
        },
    );
    let replicas: Vec<u8> = map
        .replicas_for(&Token::Murmur(5))
        .iter()
        .map(addr_of)
        .collect();
    assert_eq!(replicas, vec![5, 0, 1]);
}

#[test]
fn test_simple_strategy_rf_one() {
    let (ring, _) = six_host_ring();
    let map = ReplicaMap::build(
        ring,
        &ReplicationStrategy::Simple {
            replication_factor: 1,
        },
    );
    assert_eq!(
        map.replicas_for(&Token::Murmur(2))
            .iter()
            .map(addr_of)
            .collect::<Vec<_>>(),
        vec![2]
    );
}

#[test]
fn test_simple_strategy_rf_larger_than_cluster() {
    let (ring, _) = six_host_ring();
    let map = ReplicaMap::build(
        ring,
        &ReplicationStrategy::Simple {
            replication_factor: 10,
        },
    );
    // Degenerate rf terminates after one rotation with all distinct hosts.
    assert_eq!(map.replicas_for(&Token::Murmur(0)).len(), 6);
}

#[test]
fn test_network_topology_strategy_respects_per_dc_rf_and_racks() {
    // dc1: hosts 0,2,4 on racks a,b,a; dc2: hosts 1,3,5 on racks x,x,y.
    let hosts = vec![
        host(0, "dc1", "a", &["0"]),
        host(1, "dc2", "x", &["1"]),
        host(2, "dc1", "b", &["2"]),
        host(3, "dc2", "x", &["3"]),
        host(4, "dc1", "a", &["4"]),
        host(5, "dc2", "y", &["5"]),
    ];
    let ring = Arc::new(TokenRing::build(&hosts, &FirstByteTokenizer));
    let mut rf = HashMap::new();
    rf.insert("dc1".to_owned(), 2usize);
    rf.insert("dc2".to_owned(), 2usize);
    let map = ReplicaMap::build(
        ring,
        &ReplicationStrategy::NetworkTopology {
            replication_factor_per_dc: rf,
        },
    );

    let replicas = map.replicas_for(&Token::Murmur(0));
    let dc1: Vec<&HostRef> = replicas
        .iter()
        .filter(|h| h.datacenter().as_deref() == Some("dc1"))
        .collect();
    let dc2: Vec<&HostRef> = replicas
        .iter()
        .filter(|h| h.datacenter().as_deref() == Some("dc2"))
        .collect();
    assert_eq!(dc1.len(), 2);
    assert_eq!(dc2.len(), 2);
    // dc1 has racks {a, b}: the two replicas must be on distinct racks.
    assert_ne!(dc1[0].rack(), dc1[1].rack());
    // dc2 walk from token 0: host1(x), host3(x skipped, deferred), host5(y),
    // then the deferred same-rack host fills nothing since rf=2 is met.
    assert_eq!(addr_of(dc2[0]), 1);
    assert_eq!(addr_of(dc2[1]), 5);
}

#[test]
fn test_network_topology_same_rack_repeats_go_last() {
    // One DC, rf=3, racks: a,a,b. From token 0: host0(a), host2(a deferred),
    // host4(b) — then the deferred host2 is appended.
    let hosts = vec![
        host(0, "dc1", "a", &["0"]),
        host(2, "dc1", "a", &["2"]),
        host(4, "dc1", "b", &["4"]),
    ];
    let ring = Arc::new(TokenRing::build(&hosts, &FirstByteTokenizer));
    let mut rf = HashMap::new();
    rf.insert("dc1".to_owned(), 3usize);
    let map = ReplicaMap::build(
        ring,
        &ReplicationStrategy::NetworkTopology {
            replication_factor_per_dc: rf,
        },
    );
    let replicas: Vec<u8> = map
        .replicas_for(&Token::Murmur(0))
        .iter()
        .map(addr_of)
        .collect();
    assert_eq!(replicas, vec![0, 4, 2]);
}

#[test]
fn test_strategy_parsing_from_options() {
    let mut options = HashMap::new();
    options.insert("replication_factor".to_owned(), "3".to_owned());
    assert_eq!(
        ReplicationStrategy::from_options("org.apache.cassandra.locator.SimpleStrategy", &options),
        ReplicationStrategy::Simple {
            replication_factor: 3
        }
    );

    let mut options = HashMap::new();
    options.insert("dc1".to_owned(), "3".to_owned());
    options.insert("dc2".to_owned(), "2".to_owned());
    let strategy =
        ReplicationStrategy::from_options("NetworkTopologyStrategy", &options);
    match strategy {
        ReplicationStrategy::NetworkTopology {
            replication_factor_per_dc,
        } => {
            assert_eq!(replication_factor_per_dc.get("dc1"), Some(&3));
            assert_eq!(replication_factor_per_dc.get("dc2"), Some(&2));
        }
        other => panic!("unexpected strategy {other:?}"),
    }

    assert_eq!(
        ReplicationStrategy::from_options("org.apache.cassandra.locator.LocalStrategy", &HashMap::new()),
        ReplicationStrategy::Local
    );
}
