//! Box parsing straight out of a growing data-bin cache
//!
//! These tests drive the retry contract: bytes arrive out of order and
//! incompletely, opens return `Ok(false)` until enough of the header (or
//! the placeholder standing in for it) exists, and placeholder-backed
//! boxes are indistinguishable from the originals they redirect to.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use jp2kit_boxes::box_type::{FILE_TYPE, PLACEHOLDER, XML};
use jp2kit_boxes::{
    BoxLocator, EmbeddedHeader, FamilySource, InputBox, PHLD_ORIGINAL, PlaceholderBox,
    encode_box_header,
};
use jp2kit_cache::{DataBinCache, DataBinClass};
use pretty_assertions::assert_eq;

fn boxed(ty: jp2kit_boxes::BoxType, content: &[u8]) -> Vec<u8> {
    let mut out = encode_box_header(ty, Some(content.len() as u64), false);
    out.extend_from_slice(content);
    out
}

fn feed_meta(cache: &DataBinCache, bin: u64, offset: u64, data: &[u8], is_final: bool) {
    cache.add_to_databin(DataBinClass::Meta, 0, bin, offset, data, is_final, false);
}

#[test]
fn test_open_retries_until_header_arrives() {
    let cache = DataBinCache::new();
    let family = FamilySource::new();
    family.open_cache(&cache).unwrap();

    let full = boxed(XML, b"late bytes");
    let mut bx = InputBox::new(&family);

    // Nothing yet: not an error, just "try again".
    assert!(!bx.open().unwrap());

    // Half a header is still not enough.
    feed_meta(&cache, 0, 0, &full[..5], false);
    assert!(!bx.open().unwrap());

    // Header complete: the box opens even though content is missing.
    feed_meta(&cache, 0, 0, &full[..8], false);
    assert!(bx.open().unwrap());
    assert_eq!(bx.box_type(), Some(XML));
    assert_eq!(bx.content_len(), Some(10));

    // Content short-reads until the cache grows; remaining disambiguates
    // "hole" from "exhausted".
    let mut buf = [0u8; 10];
    assert_eq!(bx.read(&mut buf).unwrap(), 0);
    assert_eq!(bx.remaining(), Some(10));

    feed_meta(&cache, 0, 8, &full[8..], true);
    assert_eq!(bx.read(&mut buf).unwrap(), 10);
    assert_eq!(&buf, b"late bytes");
    assert_eq!(bx.remaining(), Some(0));

    family.synch_with_cache();
    assert!(bx.close().unwrap());
}

#[test]
fn test_close_reports_content_availability() {
    let cache = DataBinCache::new();
    let family = FamilySource::new();
    family.open_cache(&cache).unwrap();

    let full = boxed(XML, b"0123456789");
    feed_meta(&cache, 0, 0, &full[..12], false);

    let mut bx = InputBox::new(&family);
    assert!(bx.open().unwrap());
    // Only 4 of 10 content bytes are present.
    assert!(!bx.close().unwrap());

    feed_meta(&cache, 0, 12, &full[12..], true);
    family.synch_with_cache();
    assert!(bx.open_next().is_ok());

    let mut again = InputBox::new(&family);
    assert!(again.open().unwrap());
    assert!(again.close().unwrap());
}

#[test]
fn test_placeholder_is_transparent() {
    let cache = DataBinCache::new();
    let family = FamilySource::new();
    family.open_cache(&cache).unwrap();

    let payload = b"content delivered out of band";
    let original = boxed(XML, payload);
    // The original box lives, header included, at the start of bin 7.
    feed_meta(&cache, 7, 0, &original, true);

    // Top level: an ftyp followed by the placeholder standing in for it.
    let phld_body = PlaceholderBox {
        flags: PHLD_ORIGINAL,
        orig_bin: 7,
        orig_header: EmbeddedHeader::for_content(XML, Some(payload.len() as u64)),
        equiv: None,
    }
    .build();
    let mut top = boxed(FILE_TYPE, b"jpx ");
    top.extend_from_slice(&boxed(PLACEHOLDER, &phld_body));
    feed_meta(&cache, 0, 0, &top, true);

    // Normal navigation resolves the placeholder transparently.
    let mut bx = InputBox::new(&family);
    assert!(bx.open().unwrap());
    assert_eq!(bx.box_type(), Some(FILE_TYPE));
    assert!(bx.open_next().unwrap());
    assert_eq!(bx.box_type(), Some(XML));
    assert_eq!(bx.content_len(), Some(payload.len() as u64));

    let mut buf = vec![0u8; payload.len()];
    assert_eq!(bx.read(&mut buf).unwrap(), payload.len());
    assert_eq!(buf, payload);

    let via_placeholder = (bx.box_type(), bx.content_len());
    let phld_locator = bx.locator().unwrap();
    bx.close().unwrap();

    // Opening the original directly by its own locator agrees exactly.
    let mut direct = InputBox::new(&family);
    assert!(direct.open_at(BoxLocator::in_databin(7, 0)).unwrap());
    assert_eq!((direct.box_type(), direct.content_len()), via_placeholder);

    // Requesting the raw view yields the placeholder wrapper itself.
    let mut raw = InputBox::new(&family);
    raw.set_prefer_originals(true);
    assert!(raw.open_at(phld_locator).unwrap());
    assert_eq!(raw.box_type(), Some(PLACEHOLDER));
    assert_eq!(raw.content_len(), Some(phld_body.len() as u64));
    let record = raw.placeholder().expect("record available");
    assert_eq!(record.orig_bin, 7);
}

#[test]
fn test_placeholder_waits_for_its_record() {
    let cache = DataBinCache::new();
    let family = FamilySource::new();
    family.open_cache(&cache).unwrap();

    let phld_body = PlaceholderBox {
        flags: PHLD_ORIGINAL,
        orig_bin: 3,
        orig_header: EmbeddedHeader::for_content(XML, Some(4)),
        equiv: None,
    }
    .build();
    let top = boxed(PLACEHOLDER, &phld_body);

    // The phld header is present but its record is cut short: the open
    // must wait rather than fail or resolve half a record.
    feed_meta(&cache, 0, 0, &top[..12], false);
    let mut bx = InputBox::new(&family);
    assert!(!bx.open().unwrap());

    feed_meta(&cache, 0, 12, &top[12..], true);
    feed_meta(&cache, 3, 0, &boxed(XML, b"real"), true);
    family.synch_with_cache();
    assert!(bx.open().unwrap());
    assert_eq!(bx.box_type(), Some(XML));

    let mut buf = [0u8; 4];
    assert_eq!(bx.read(&mut buf).unwrap(), 4);
    assert_eq!(&buf, b"real");
}

#[test]
fn test_super_box_locking_over_cache() {
    let cache = DataBinCache::new();
    let family = FamilySource::new();
    family.open_cache(&cache).unwrap();

    let mut payload = boxed(XML, b"first");
    payload.extend_from_slice(&boxed(XML, b"second"));
    let top = boxed(FILE_TYPE, &payload);
    feed_meta(&cache, 0, 0, &top, true);

    let mut parent = InputBox::new(&family);
    assert!(parent.open().unwrap());

    let mut child = parent.open_child().unwrap().expect("first child");
    assert!(parent.is_locked());
    let mut buf = [0u8; 4];
    assert!(parent.read(&mut buf).is_err());
    assert!(parent.open_child().is_err());

    // The moment the child closes, the super-box is usable again.
    child.close().unwrap();
    assert!(!parent.is_locked());
    let second = parent.open_child().unwrap().expect("second child");
    drop(second);
    assert_eq!(parent.remaining(), Some(0));
}

#[test]
fn test_feeder_thread_and_polling_reader() {
    let cache = DataBinCache::new();
    let family = FamilySource::new();
    family.open_cache(&cache).unwrap();

    let full = boxed(XML, b"concurrently delivered");
    let feeder_cache = cache.attach();
    let chunks: Vec<(u64, Vec<u8>)> = full
        .chunks(5)
        .enumerate()
        .map(|(i, c)| ((i * 5) as u64, c.to_vec()))
        .collect();
    let total = full.len() as u64;

    let feeder = std::thread::spawn(move || {
        // Deliver back to front; the reader can only make progress once
        // the prefix fills in.
        for (offset, chunk) in chunks.iter().rev() {
            let is_final = offset + chunk.len() as u64 == total;
            feeder_cache.add_to_databin(
                DataBinClass::Meta,
                0,
                0,
                *offset,
                chunk,
                is_final,
                false,
            );
            std::thread::yield_now();
        }
    });

    let mut bx = InputBox::new(&family);
    let mut content = Vec::new();
    for _ in 0..1_000_000 {
        family.synch_with_cache();
        if !bx.is_open() && !bx.open().unwrap() {
            std::thread::yield_now();
            continue;
        }
        let mut buf = [0u8; 64];
        let n = bx.read(&mut buf).unwrap();
        content.extend_from_slice(&buf[..n]);
        if bx.remaining() == Some(0) {
            break;
        }
        std::thread::yield_now();
    }
    feeder.join().unwrap();

    assert_eq!(content, b"concurrently delivered");
    assert!(bx.close().unwrap());
}
