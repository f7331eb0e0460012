//! Property tests for the codecs, heaps, group index and allocator.

use std::collections::HashSet;

use basehdf5_format::allocation::{AllocationKind, FileAllocation, MIN_RAW_DATA_OFFSET};
use basehdf5_format::byte_order::{reorder, swap, DatatypeByteOrder};
use basehdf5_format::fixed_point::{FixedPointLayout, FixedPointValue};
use basehdf5_format::float_point;
use basehdf5_format::global_heap::{GlobalHeap, HeapAccess};
use basehdf5_format::group_btree::{GroupBTree, NamedEntry, TreeShape};
use basehdf5_format::local_heap::LocalHeap;
use basehdf5_format::symbol_table::SymbolTableEntry;
use proptest::prelude::*;

fn byte_order() -> impl Strategy<Value = DatatypeByteOrder> {
    prop_oneof![
        Just(DatatypeByteOrder::LittleEndian),
        Just(DatatypeByteOrder::BigEndian)
    ]
}

/// A field layout together with a raw value that fits its precision.
fn fixed_point_case() -> impl Strategy<Value = (FixedPointLayout, u64)> {
    (1u32..=8, any::<bool>(), byte_order())
        .prop_flat_map(|(size, signed, order)| {
            let bits = (size * 8) as u16;
            (Just((size, signed, order)), 1..=bits).prop_flat_map(move |(base, precision)| {
                (Just(base), Just(precision), 0..=(bits - precision), any::<u64>())
            })
        })
        .prop_map(|((size, signed, byte_order), bit_precision, bit_offset, raw)| {
            let layout = FixedPointLayout {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            };
            (layout, raw)
        })
}

fn place(file: &mut Vec<u8>, address: u64, bytes: &[u8]) {
    let a = address as usize;
    if file.len() < a + bytes.len() {
        file.resize(a + bytes.len(), 0);
    }
    file[a..a + bytes.len()].copy_from_slice(bytes);
}

fn kind(i: u8) -> AllocationKind {
    match i % 9 {
        0 => AllocationKind::Superblock,
        1 => AllocationKind::ObjectHeader,
        2 => AllocationKind::BTree,
        3 => AllocationKind::SymbolNode,
        4 => AllocationKind::LocalHeapHeader,
        5 => AllocationKind::LocalHeapData,
        6 => AllocationKind::GlobalHeap,
        7 => AllocationKind::Continuation,
        _ => AllocationKind::RawData,
    }
}

proptest! {
    #[test]
    fn fixed_point_round_trip((layout, raw) in fixed_point_case()) {
        let p = u32::from(layout.bit_precision);
        if layout.signed {
            let shift = 64 - p;
            let value = ((raw << shift) as i64) >> shift;
            let bytes = layout.encode_signed(value).unwrap();
            prop_assert_eq!(bytes.len(), layout.size as usize);
            prop_assert_eq!(layout.decode(&bytes).unwrap(), FixedPointValue::Signed(value));
        } else {
            let value = if p == 64 { raw } else { raw & ((1u64 << p) - 1) };
            let bytes = layout.encode_unsigned(value).unwrap();
            prop_assert_eq!(layout.decode(&bytes).unwrap(), FixedPointValue::Unsigned(value));
        }
    }

    #[test]
    fn fixed_point_rejects_values_above_precision(size in 1u32..=7, order in byte_order()) {
        let layout = FixedPointLayout::integer(size, false, order);
        let too_big = 1u64 << (size * 8);
        prop_assert!(layout.encode_unsigned(too_big).is_err());
    }

    #[test]
    fn f64_round_trip(
        value in any::<f64>().prop_filter("not NaN", |v| !v.is_nan()),
        order in byte_order(),
    ) {
        let bytes = float_point::encode(value, 8, order).unwrap();
        prop_assert_eq!(float_point::decode(&bytes, 8, order).unwrap(), value);
    }

    #[test]
    fn f32_round_trip(
        value in any::<f32>().prop_filter("not NaN", |v| !v.is_nan()),
        order in byte_order(),
    ) {
        let bytes = float_point::encode(f64::from(value), 4, order).unwrap();
        prop_assert_eq!(bytes.len(), 4);
        prop_assert_eq!(float_point::decode(&bytes, 4, order).unwrap(), f64::from(value));
    }

    #[test]
    fn byte_swap_is_involutive(bytes in prop::collection::vec(any::<u8>(), 0..32)) {
        let mut twice = bytes.clone();
        swap(&mut twice);
        swap(&mut twice);
        prop_assert_eq!(&twice, &bytes);
        let there = reorder(&bytes, DatatypeByteOrder::LittleEndian, DatatypeByteOrder::BigEndian);
        let back = reorder(&there, DatatypeByteOrder::BigEndian, DatatypeByteOrder::LittleEndian);
        prop_assert_eq!(back, bytes);
    }

    #[test]
    fn group_index_stays_ordered(
        names in prop::collection::hash_set("[a-z]{1,10}", 1..120),
        leaf_k in 1u16..=4,
        internal_k in 1u16..=4,
    ) {
        let shape = TreeShape { leaf_k, internal_k, offset_size: 8, length_size: 8 };
        let mut alloc = FileAllocation::new();
        let mut tree = GroupBTree::create(&mut alloc, shape).unwrap();
        let mut heap = LocalHeap::create(&mut alloc, 8, 8).unwrap();
        for (i, name) in names.iter().enumerate() {
            let offset = heap.add_string(name, &mut alloc).unwrap();
            let entry = SymbolTableEntry::object(offset, 0x10_000 + i as u64);
            tree.insert(NamedEntry { name: name.clone(), entry }, &mut alloc).unwrap();
        }

        let ordered: Vec<&str> = tree.iter_in_order().map(|e| e.name.as_str()).collect();
        prop_assert_eq!(ordered.len(), names.len());
        prop_assert!(ordered.windows(2).all(|w| w[0] < w[1]));
        for name in &names {
            prop_assert!(tree.find(name).is_some());
        }
        prop_assert!(tree.find("0-not-a-name").is_none());

        let mut file = Vec::new();
        for (address, bytes) in tree.serialize() {
            place(&mut file, address, &bytes);
        }
        let reread = GroupBTree::read(&file, tree.address(), &heap, shape).unwrap();
        let again: Vec<&str> = reread.iter_in_order().map(|e| e.name.as_str()).collect();
        prop_assert_eq!(again, ordered);
    }

    #[test]
    fn local_heap_addressing(strings in prop::collection::vec("\\PC{0,40}", 0..60)) {
        let mut alloc = FileAllocation::new();
        let mut heap = LocalHeap::create(&mut alloc, 8, 8).unwrap();
        let offsets: Vec<u64> = strings
            .iter()
            .map(|s| heap.add_string(s, &mut alloc).unwrap())
            .collect();
        prop_assert_eq!(heap.string_at(0).unwrap(), "");
        for (s, offset) in strings.iter().zip(offsets) {
            prop_assert_eq!(&heap.string_at(offset).unwrap(), s);
        }
    }

    #[test]
    fn global_heap_addressing(
        objects in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..6000), 1..12),
    ) {
        let mut alloc = FileAllocation::new();
        let mut writer = GlobalHeap::new(8);
        let ids: Vec<_> = objects
            .iter()
            .map(|o| writer.put(&mut alloc, o).unwrap())
            .collect();

        let mut file = vec![0u8; alloc.end_of_file() as usize];
        for coll in writer.collections() {
            place(&mut file, coll.address, &coll.serialize(8));
        }
        let mut reader = GlobalHeap::new(8);
        for id in &ids {
            reader.resolve(&file, id.collection_address).unwrap();
        }
        for (object, id) in objects.iter().zip(&ids) {
            prop_assert_eq!(reader.get_object(*id).unwrap(), object.as_slice());
        }
    }

    #[test]
    fn allocations_never_overlap(
        requests in prop::collection::vec((any::<u8>(), 0u64..10_000), 1..80),
    ) {
        let mut alloc = FileAllocation::new();
        for (k, size) in &requests {
            alloc.allocate(kind(*k), *size).unwrap();
        }
        let blocks = alloc.allocations();
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                prop_assert!(a.size == 0 || b.size == 0 || !a.overlaps(b));
            }
            if a.kind == AllocationKind::RawData {
                prop_assert!(a.offset >= MIN_RAW_DATA_OFFSET);
            }
        }
        let end = blocks.iter().map(|b| b.end()).max().unwrap_or(0);
        prop_assert_eq!(alloc.end_of_file(), end);
        let sized: Vec<_> = blocks.iter().filter(|b| b.size > 0).collect();
        let starts: HashSet<u64> = sized.iter().map(|b| b.offset).collect();
        prop_assert_eq!(starts.len(), sized.len());
    }
}
