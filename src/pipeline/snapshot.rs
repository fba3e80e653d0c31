//! Auction snapshot decoding.
//!
//! Two published layouts are accepted:
//!
//! ```json
//! {"realm": {"name": "..", "slug": ".."}, "auctions": {"auctions": [ ... ]}}
//! {"realms": [{"name": "..", "slug": ".."}], "auctions": [ ... ]}
//! ```
//!
//! Invalid entries reject the whole file: a snapshot either yields every one of
//! its listings or none.

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::types::{AuctionFile, AuctionRecord, TimeLeft};

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    realm: Option<RawRealm>,
    #[serde(default)]
    realms: Vec<RawRealm>,
    auctions: RawAuctions,
}

#[derive(Debug, Deserialize)]
struct RawRealm {
    #[serde(default)]
    slug: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAuctions {
    Nested { auctions: Vec<RawAuction> },
    Flat(Vec<RawAuction>),
}

#[derive(Debug, Deserialize)]
struct RawAuction {
    auc: Option<i64>,
    item: Option<i64>,
    owner: Option<String>,
    #[serde(rename = "ownerRealm")]
    owner_realm: Option<String>,
    bid: Option<i64>,
    buyout: Option<i64>,
    quantity: Option<i64>,
    #[serde(rename = "timeLeft")]
    time_left: Option<String>,
}

#[derive(Debug)]
pub struct Snapshot {
    /// Realm slugs named in the header. Connected realms share one snapshot.
    pub realm_slugs: Vec<String>,
    pub records: Vec<AuctionRecord>,
}

/// Decode and validate a snapshot for `file`. Every error is `ParseFailed`.
pub fn decode(bytes: &[u8], file: &AuctionFile) -> Result<Snapshot> {
    let raw: RawSnapshot = serde_json::from_slice(bytes)
        .map_err(|e| AppError::ParseFailed(format!("malformed snapshot: {e}")))?;

    let entries = match raw.auctions {
        RawAuctions::Nested { auctions } => auctions,
        RawAuctions::Flat(auctions) => auctions,
    };

    let mut records = Vec::with_capacity(entries.len());
    let mut invalid = 0usize;
    let mut first_error = None;

    for (idx, entry) in entries.into_iter().enumerate() {
        match validate(entry, file) {
            Ok(record) => records.push(record),
            Err(reason) => {
                invalid += 1;
                first_error.get_or_insert_with(|| format!("entry {idx}: {reason}"));
            }
        }
    }

    if let Some(first) = first_error {
        return Err(AppError::ParseFailed(format!(
            "{invalid} invalid entries, first: {first}"
        )));
    }

    let realm_slugs = raw
        .realm
        .into_iter()
        .chain(raw.realms)
        .map(|r| r.slug)
        .filter(|s| !s.is_empty())
        .collect();

    Ok(Snapshot { realm_slugs, records })
}

fn validate(entry: RawAuction, file: &AuctionFile) -> std::result::Result<AuctionRecord, String> {
    let item_id = entry.item.ok_or("missing item")?;
    let quantity = amount("quantity", entry.quantity)?;
    let quantity = u32::try_from(quantity).map_err(|_| format!("quantity {quantity} out of range"))?;
    let bid = amount("bid", entry.bid)?;
    let buyout = amount("buyout", entry.buyout)?;
    let time_left = entry
        .time_left
        .ok_or("missing timeLeft")?
        .parse::<TimeLeft>()
        .map_err(|e| match e {
            AppError::ParseFailed(msg) => msg,
            other => other.to_string(),
        })?;

    Ok(AuctionRecord {
        auction_id: entry.auc,
        item_id,
        owner: entry.owner,
        owner_realm: entry.owner_realm,
        quantity,
        bid,
        buyout,
        time_left,
        auction_file_id: file.id,
        realm_id: file.realm_id,
    })
}

fn amount(field: &str, value: Option<i64>) -> std::result::Result<u64, String> {
    match value {
        None => Err(format!("missing {field}")),
        Some(v) if v < 0 => Err(format!("negative {field} ({v})")),
        Some(v) => Ok(v as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileStatus;

    const SAMPLE: &str = include_str!("../../tests/fixtures/auction-data-sample.json");
    const NEGATIVE_BID: &str = include_str!("../../tests/fixtures/auction-data-negative-bid.json");

    fn file() -> AuctionFile {
        AuctionFile {
            id: 9,
            realm_id: 3,
            url: "test".to_string(),
            last_modified: 1,
            file_name: "auction-data-sample.json".to_string(),
            status: FileStatus::Processing,
            failure_kind: None,
            failure_reason: None,
            created_at: 0,
        }
    }

    #[test]
    fn decodes_nested_layout() {
        let snap = decode(SAMPLE.as_bytes(), &file()).unwrap();
        assert_eq!(snap.realm_slugs, vec!["grim-batol".to_string()]);
        assert_eq!(snap.records.len(), 5);

        let first = &snap.records[0];
        assert_eq!(first.auction_id, Some(1_660_912_893));
        assert_eq!(first.item_id, 82_800);
        assert_eq!(first.bid, 2_400_000);
        assert_eq!(first.buyout, 2_500_000);
        assert_eq!(first.time_left, TimeLeft::VeryLong);
        assert_eq!((first.auction_file_id, first.realm_id), (9, 3));
    }

    #[test]
    fn decodes_flat_layout() {
        let raw = r#"{"realms":[{"name":"Hellscream","slug":"hellscream"},{"name":"Aggramar","slug":"aggramar"}],
            "auctions":[{"auc":1,"item":25,"owner":"Jaina","bid":10,"buyout":0,"quantity":20,"timeLeft":"SHORT","rand":0}]}"#;
        let snap = decode(raw.as_bytes(), &file()).unwrap();
        assert_eq!(snap.realm_slugs, vec!["hellscream", "aggramar"]);
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.records[0].quantity, 20);
        assert_eq!(snap.records[0].buyout, 0);
    }

    #[test]
    fn one_negative_bid_rejects_the_whole_file() {
        let err = decode(NEGATIVE_BID.as_bytes(), &file()).unwrap_err();
        match err {
            AppError::ParseFailed(msg) => {
                assert!(msg.contains("1 invalid entries"), "{msg}");
                assert!(msg.contains("negative bid"), "{msg}");
            }
            other => panic!("expected ParseFailed, got {other:?}"),
        }
    }

    #[test]
    fn missing_fields_are_invalid() {
        for entry in [
            r#"{"item":1,"quantity":1,"buyout":5,"timeLeft":"LONG"}"#,
            r#"{"item":1,"quantity":1,"bid":5,"timeLeft":"LONG"}"#,
            r#"{"item":1,"bid":5,"buyout":5,"timeLeft":"LONG"}"#,
            r#"{"quantity":1,"bid":5,"buyout":5,"timeLeft":"LONG"}"#,
            r#"{"item":1,"quantity":1,"bid":5,"buyout":5}"#,
            r#"{"item":1,"quantity":1,"bid":5,"buyout":5,"timeLeft":"FOREVER"}"#,
            r#"{"item":1,"quantity":-1,"bid":5,"buyout":5,"timeLeft":"LONG"}"#,
        ] {
            let raw = format!(r#"{{"auctions":[{entry}]}}"#);
            let err = decode(raw.as_bytes(), &file()).unwrap_err();
            assert!(matches!(err, AppError::ParseFailed(_)), "{entry} must be rejected");
        }
    }

    #[test]
    fn truncated_input_is_a_parse_failure() {
        let cut = &SAMPLE.as_bytes()[..SAMPLE.len() / 2];
        assert!(matches!(decode(cut, &file()), Err(AppError::ParseFailed(_))));
        assert!(matches!(decode(b"", &file()), Err(AppError::ParseFailed(_))));
        assert!(matches!(decode(b"{\"realm\":{}}", &file()), Err(AppError::ParseFailed(_))));
    }

    #[test]
    fn empty_listing_is_valid() {
        let snap = decode(br#"{"auctions":{"auctions":[]}}"#, &file()).unwrap();
        assert!(snap.records.is_empty());
    }
}
