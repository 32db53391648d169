use bincraft::conditional::Union;
use bincraft::derived::Rebuild;
use bincraft::envelopes::{bitwise, bytewise};
use bincraft::expr::len;
use bincraft::positional::Pointer;
use bincraft::primitives::{GreedyBytes, VarInt, ZigZag};
use bincraft::repeaters::{Array, PrefixedArray};
use bincraft::strings::{Encoding, PrefixedString};
use bincraft::structs::Struct;
use bincraft::{
    ConstructExt, Container, Value, container, field, i32_le, stream, this, u8,
    u16_be, u16_le, u32_be,
};
use proptest::prelude::*;

fn record() -> Struct {
    Struct::new([
        field("tag", u8()),
        field("value", i32_le()),
        field("n", Rebuild::new(u8(), len(this("items")))),
        field("items", Array::new(this("n"), u16_be())),
        field("name", PrefixedString::new(u8(), Encoding::Utf8)),
        field("extra", PrefixedArray::new(u16_le(), u8())),
    ])
}

fn header() -> Struct {
    Struct::new([
        field("kind", u8()),
        field("length", u32_be()),
        field("value", i32_le()),
    ])
}

fn ints<T: Into<Value> + Clone>(items: &[T]) -> Value {
    Value::List(items.iter().cloned().map(Into::into).collect())
}

proptest! {
    #[test]
    fn record_round_trips(
        tag in any::<u8>(),
        value in any::<i32>(),
        items in prop::collection::vec(any::<u16>(), 0..20),
        name in "[a-zA-Z0-9 ]{0,30}",
        extra in prop::collection::vec(any::<u8>(), 0..40),
    ) {
        let format = record();
        let input = container! {
            "tag" => tag,
            "value" => value,
            "items" => ints(&items),
            "name" => name.as_str(),
            "extra" => ints(&extra),
        };
        let data = format.build_bytes(&input).unwrap();
        let parsed = format.parse_bytes(&data).unwrap();

        let expected = container! {
            "tag" => tag,
            "value" => value,
            "n" => items.len(),
            "items" => ints(&items),
            "name" => name.as_str(),
            "extra" => ints(&extra),
        };
        prop_assert_eq!(&parsed, &expected);
        prop_assert_eq!(format.build_bytes(&parsed).unwrap(), data);
    }

    #[test]
    fn fixed_size_matches_built_length(kind in any::<u8>(), length in any::<u32>(), value in any::<i32>()) {
        let format = header();
        let input = container! { "kind" => kind, "length" => length, "value" => value };
        let data = format.build_bytes(&input).unwrap();
        prop_assert_eq!(data.len(), format.static_size().unwrap());

        let mut s = stream::memory([data.clone(), vec![0xAA; 5]].concat());
        let parsed = bincraft::parse_stream(&format, &mut s, Container::new()).unwrap();
        prop_assert_eq!(parsed, input);
        prop_assert_eq!(s.position() as usize, data.len());
    }

    #[test]
    fn varints_round_trip(n in any::<u64>(), z in any::<i64>()) {
        let data = VarInt::new().build_bytes(&Value::from(n)).unwrap();
        prop_assert_eq!(VarInt::new().parse_bytes(&data).unwrap(), Value::from(n));

        let data = ZigZag.build_bytes(&Value::from(z)).unwrap();
        prop_assert_eq!(ZigZag.parse_bytes(&data).unwrap(), Value::from(z));
    }

    #[test]
    fn pointer_leaves_position_alone(
        data in prop::collection::vec(any::<u8>(), 1..64),
        start in 0usize..64,
        target in 0usize..64,
    ) {
        let start = start % data.len();
        let target = target % data.len();
        let pointer = Pointer::new(target, u8());

        let mut s = stream::memory(data.clone());
        s.set_position(start as u64);
        let parsed = bincraft::parse_stream(&pointer, &mut s, Container::new()).unwrap();
        prop_assert_eq!(parsed, Value::from(data[target]));
        prop_assert_eq!(s.position() as usize, start);
        prop_assert_eq!(pointer.static_size().unwrap(), 0);
    }

    #[test]
    fn union_advances_by_largest_fixed_alternative(
        data in prop::collection::vec(any::<u8>(), 4..32),
    ) {
        let union = Union::new(
            None,
            [
                field("short", u8()),
                field("long", u32_be()),
                field("rest", GreedyBytes),
            ],
        );
        let mut s = stream::memory(data.clone());
        let parsed = bincraft::parse_stream(&union, &mut s, Container::new()).unwrap();
        prop_assert_eq!(s.position(), 4);
        prop_assert_eq!(parsed.attr("short").unwrap(), Value::from(data[0]));
        prop_assert_eq!(parsed.attr("rest").unwrap(), Value::from(data.clone()));
    }

    #[test]
    fn bytewise_inside_bitwise_is_transparent(n in any::<u16>()) {
        let plain = u16_be();
        let wrapped = bitwise(bytewise(u16_be()));
        let data = plain.build_bytes(&Value::from(n)).unwrap();
        prop_assert_eq!(wrapped.build_bytes(&Value::from(n)).unwrap(), data.clone());
        prop_assert_eq!(wrapped.parse_bytes(&data).unwrap(), Value::from(n));
        prop_assert_eq!(wrapped.static_size().unwrap(), plain.static_size().unwrap());
    }
}

#[test]
fn union_builds_the_first_supplied_alternative_padded() {
    let union = Union::new(None, [field("short", u8()), field("long", u32_be())]);
    let data = union.build_bytes(&container! { "short" => 7 }).unwrap();
    assert_eq!(data, vec![7, 0, 0, 0]);
    assert_eq!(union.static_size().unwrap(), 4);
}
