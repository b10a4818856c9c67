//! Object identifier registry
//!
//! One static table maps every known object id to its name and record
//! shape. It is indexed once into hash maps on first use. Adding an object
//! is a one-line change to `OBJECTS`.
//!
//! Ids missing from the table still work: their payload decodes as raw bytes.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::object_id::ObjectId;
use super::record::{
    RecordShape, Width, CSQ_NET_OP_FIELDS, THRESHOLD_COUNT, THRESHOLD_MASK_FIELDS,
    TIME_SWITCH_BLOCK_LEN,
};

/// A known object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub name: &'static str,
    pub shape: RecordShape,
}

const U1: RecordShape = RecordShape::U1;
const U2LE: RecordShape = RecordShape::U2Le;
const U4LE: RecordShape = RecordShape::U4Le;
const S4LE: RecordShape = RecordShape::S4Le;
const ASCII: RecordShape = RecordShape::Ascii(Width::Remainder);
const RAW: RecordShape = RecordShape::RAW;
const EMPTY: RecordShape = RecordShape::Empty;
const TIME: RecordShape = RecordShape::Time;
const CSQ_NET_OP: RecordShape = RecordShape::BitPacked(CSQ_NET_OP_FIELDS);
const THRESHOLD_MASK: RecordShape = RecordShape::BitPacked(THRESHOLD_MASK_FIELDS);
const THRESHOLD_VALUES: RecordShape = RecordShape::U2LeArray(THRESHOLD_COUNT);
const TIME_SWITCHES: RecordShape = RecordShape::Block(Width::Fixed(TIME_SWITCH_BLOCK_LEN));
const TRANSACTION_DETAILS: RecordShape = RecordShape::TransactionDetails;

const fn entry(id: u32, name: &'static str, shape: RecordShape) -> ObjectEntry {
    ObjectEntry {
        id: ObjectId::from_u24(id),
        name,
        shape,
    }
}

/// Every object the meters are known to expose, ordered by id
#[rustfmt::skip]
pub static OBJECTS: &[ObjectEntry] = &[
    entry(0x000201, "firmware_version", RAW),
    entry(0x010700, "instantaneous_active_power", RAW),
    entry(0x010800, "total_active_import_energy", RAW),
    entry(0x020800, "total_active_export_energy", RAW),
    entry(0x030700, "instantaneous_reactive_power", RAW),
    entry(0x0b0700, "instantaneous_current", RAW),
    entry(0x0b1800, "average_current", RAW),
    entry(0x0c0700, "instantaneous_voltage", U2LE),
    entry(0x0c1800, "average_voltage", RAW),
    entry(0x0d0000, "tariff_time_switch_element_a_or_single", TIME_SWITCHES),
    entry(0x0d00ff, "tariff_time_switch_element_b", TIME_SWITCHES),
    entry(0x0d0700, "instantaneous_power_factor", RAW),
    entry(0x0e0700, "instantaneous_frequency", RAW),
    entry(0x0e1800, "average_frequency", RAW),
    entry(0x150700, "element_a_instantaneous_active_power_import", RAW),
    entry(0x200700, "three_phase_instantaneous_voltage_l1", U2LE),
    entry(0x290700, "element_b_instantaneous_active_power_import", RAW),
    entry(0x340700, "three_phase_instantaneous_voltage_l2", U2LE),
    entry(0x480700, "three_phase_instantaneous_voltage_l3", U2LE),
    entry(0x600100, "serial", ASCII),
    entry(0x608000, "hardware_version", ASCII),
    entry(0x800800, "time", TIME),
    entry(0xd7060a, "three_phase_read", RAW),
    entry(0xd70a0c, "three_phase_initiate_read", RAW),
    entry(0xd7ff10, "three_phase_serial", RAW),
    entry(0xffc802, "prepay_balance", S4LE),
    entry(0xffc803, "prepay_token_send", EMPTY),
    entry(0xffc805, "tariff_active_prepayment_emergency_credit", U4LE),
    entry(0xffc806, "tariff_active_prepayment_ecredit_availability", U4LE),
    entry(0xffc807, "tariff_active_prepayment_debt_recovery_rate", U4LE),
    entry(0xffc808, "tariff_future_prepayment_emergency_credit", U4LE),
    entry(0xffc809, "tariff_future_prepayment_ecredit_availability", U4LE),
    entry(0xffc80a, "tariff_future_prepayment_debt_recovery_rate", U4LE),
    entry(0xffc83e, "monetary_info_transaction_count", U2LE),
    entry(0xffc840, "monetary_info_transaction_details", TRANSACTION_DETAILS),
    entry(0xffc964, "tariff_active_gas", U4LE),
    entry(0xffc965, "tariff_future_gas", U4LE),
    entry(0xfff601, "tariff_future_element_b_tou_rate_1", U4LE),
    entry(0xfff602, "tariff_future_element_b_tou_rate_2", U4LE),
    entry(0xfff603, "tariff_future_element_b_tou_rate_3", U4LE),
    entry(0xfff604, "tariff_future_element_b_tou_rate_4", U4LE),
    entry(0xfff701, "tariff_active_element_b_tou_rate_1", U4LE),
    entry(0xfff702, "tariff_active_element_b_tou_rate_2", U4LE),
    entry(0xfff703, "tariff_active_element_b_tou_rate_3", U4LE),
    entry(0xfff704, "tariff_active_element_b_tou_rate_4", U4LE),
    entry(0xfff801, "tariff_future_block_1_rate_1", U4LE),
    entry(0xfff802, "tariff_future_block_1_rate_2", U4LE),
    entry(0xfff803, "tariff_future_block_1_rate_3", U4LE),
    entry(0xfff804, "tariff_future_block_1_rate_4", U4LE),
    entry(0xfff805, "tariff_future_block_1_rate_5", U4LE),
    entry(0xfff806, "tariff_future_block_1_rate_6", U4LE),
    entry(0xfff807, "tariff_future_block_1_rate_7", U4LE),
    entry(0xfff808, "tariff_future_block_1_rate_8", U4LE),
    entry(0xfff809, "tariff_future_block_2_rate_1", U4LE),
    entry(0xfff80a, "tariff_future_block_2_rate_2", U4LE),
    entry(0xfff80b, "tariff_future_block_2_rate_3", U4LE),
    entry(0xfff80c, "tariff_future_block_2_rate_4", U4LE),
    entry(0xfff80d, "tariff_future_block_2_rate_5", U4LE),
    entry(0xfff80e, "tariff_future_block_2_rate_6", U4LE),
    entry(0xfff80f, "tariff_future_block_2_rate_7", U4LE),
    entry(0xfff810, "tariff_future_block_2_rate_8", U4LE),
    entry(0xfff811, "tariff_future_block_3_rate_1", U4LE),
    entry(0xfff812, "tariff_future_block_3_rate_2", U4LE),
    entry(0xfff813, "tariff_future_block_3_rate_3", U4LE),
    entry(0xfff814, "tariff_future_block_3_rate_4", U4LE),
    entry(0xfff815, "tariff_future_block_3_rate_5", U4LE),
    entry(0xfff816, "tariff_future_block_3_rate_6", U4LE),
    entry(0xfff817, "tariff_future_block_3_rate_7", U4LE),
    entry(0xfff818, "tariff_future_block_3_rate_8", U4LE),
    entry(0xfff819, "tariff_future_block_4_rate_1", U4LE),
    entry(0xfff81a, "tariff_future_block_4_rate_2", U4LE),
    entry(0xfff81b, "tariff_future_block_4_rate_3", U4LE),
    entry(0xfff81c, "tariff_future_block_4_rate_4", U4LE),
    entry(0xfff81d, "tariff_future_block_4_rate_5", U4LE),
    entry(0xfff81e, "tariff_future_block_4_rate_6", U4LE),
    entry(0xfff81f, "tariff_future_block_4_rate_7", U4LE),
    entry(0xfff820, "tariff_future_block_4_rate_8", U4LE),
    entry(0xfff821, "tariff_future_block_5_rate_1", U4LE),
    entry(0xfff822, "tariff_future_block_5_rate_2", U4LE),
    entry(0xfff823, "tariff_future_block_5_rate_3", U4LE),
    entry(0xfff824, "tariff_future_block_5_rate_4", U4LE),
    entry(0xfff825, "tariff_future_block_5_rate_5", U4LE),
    entry(0xfff826, "tariff_future_block_5_rate_6", U4LE),
    entry(0xfff827, "tariff_future_block_5_rate_7", U4LE),
    entry(0xfff828, "tariff_future_block_5_rate_8", U4LE),
    entry(0xfff829, "tariff_future_block_6_rate_1", U4LE),
    entry(0xfff82a, "tariff_future_block_6_rate_2", U4LE),
    entry(0xfff82b, "tariff_future_block_6_rate_3", U4LE),
    entry(0xfff82c, "tariff_future_block_6_rate_4", U4LE),
    entry(0xfff82d, "tariff_future_block_6_rate_5", U4LE),
    entry(0xfff82e, "tariff_future_block_6_rate_6", U4LE),
    entry(0xfff82f, "tariff_future_block_6_rate_7", U4LE),
    entry(0xfff830, "tariff_future_block_6_rate_8", U4LE),
    entry(0xfff831, "tariff_future_block_7_rate_1", U4LE),
    entry(0xfff832, "tariff_future_block_7_rate_2", U4LE),
    entry(0xfff833, "tariff_future_block_7_rate_3", U4LE),
    entry(0xfff834, "tariff_future_block_7_rate_4", U4LE),
    entry(0xfff835, "tariff_future_block_7_rate_5", U4LE),
    entry(0xfff836, "tariff_future_block_7_rate_6", U4LE),
    entry(0xfff837, "tariff_future_block_7_rate_7", U4LE),
    entry(0xfff838, "tariff_future_block_7_rate_8", U4LE),
    entry(0xfff839, "tariff_future_block_8_rate_1", U4LE),
    entry(0xfff83a, "tariff_future_block_8_rate_2", U4LE),
    entry(0xfff83b, "tariff_future_block_8_rate_3", U4LE),
    entry(0xfff83c, "tariff_future_block_8_rate_4", U4LE),
    entry(0xfff83d, "tariff_future_block_8_rate_5", U4LE),
    entry(0xfff83e, "tariff_future_block_8_rate_6", U4LE),
    entry(0xfff83f, "tariff_future_block_8_rate_7", U4LE),
    entry(0xfff840, "tariff_future_block_8_rate_8", U4LE),
    entry(0xfff901, "tariff_active_block_1_rate_1", U4LE),
    entry(0xfff902, "tariff_active_block_1_rate_2", U4LE),
    entry(0xfff903, "tariff_active_block_1_rate_3", U4LE),
    entry(0xfff904, "tariff_active_block_1_rate_4", U4LE),
    entry(0xfff905, "tariff_active_block_1_rate_5", U4LE),
    entry(0xfff906, "tariff_active_block_1_rate_6", U4LE),
    entry(0xfff907, "tariff_active_block_1_rate_7", U4LE),
    entry(0xfff908, "tariff_active_block_1_rate_8", U4LE),
    entry(0xfff909, "tariff_active_block_2_rate_1", U4LE),
    entry(0xfff90a, "tariff_active_block_2_rate_2", U4LE),
    entry(0xfff90b, "tariff_active_block_2_rate_3", U4LE),
    entry(0xfff90c, "tariff_active_block_2_rate_4", U4LE),
    entry(0xfff90d, "tariff_active_block_2_rate_5", U4LE),
    entry(0xfff90e, "tariff_active_block_2_rate_6", U4LE),
    entry(0xfff90f, "tariff_active_block_2_rate_7", U4LE),
    entry(0xfff910, "tariff_active_block_2_rate_8", U4LE),
    entry(0xfff911, "tariff_active_block_3_rate_1", U4LE),
    entry(0xfff912, "tariff_active_block_3_rate_2", U4LE),
    entry(0xfff913, "tariff_active_block_3_rate_3", U4LE),
    entry(0xfff914, "tariff_active_block_3_rate_4", U4LE),
    entry(0xfff915, "tariff_active_block_3_rate_5", U4LE),
    entry(0xfff916, "tariff_active_block_3_rate_6", U4LE),
    entry(0xfff917, "tariff_active_block_3_rate_7", U4LE),
    entry(0xfff918, "tariff_active_block_3_rate_8", U4LE),
    entry(0xfff919, "tariff_active_block_4_rate_1", U4LE),
    entry(0xfff91a, "tariff_active_block_4_rate_2", U4LE),
    entry(0xfff91b, "tariff_active_block_4_rate_3", U4LE),
    entry(0xfff91c, "tariff_active_block_4_rate_4", U4LE),
    entry(0xfff91d, "tariff_active_block_4_rate_5", U4LE),
    entry(0xfff91e, "tariff_active_block_4_rate_6", U4LE),
    entry(0xfff91f, "tariff_active_block_4_rate_7", U4LE),
    entry(0xfff920, "tariff_active_block_4_rate_8", U4LE),
    entry(0xfff921, "tariff_active_block_5_rate_1", U4LE),
    entry(0xfff922, "tariff_active_block_5_rate_2", U4LE),
    entry(0xfff923, "tariff_active_block_5_rate_3", U4LE),
    entry(0xfff924, "tariff_active_block_5_rate_4", U4LE),
    entry(0xfff925, "tariff_active_block_5_rate_5", U4LE),
    entry(0xfff926, "tariff_active_block_5_rate_6", U4LE),
    entry(0xfff927, "tariff_active_block_5_rate_7", U4LE),
    entry(0xfff928, "tariff_active_block_5_rate_8", U4LE),
    entry(0xfff929, "tariff_active_block_6_rate_1", U4LE),
    entry(0xfff92a, "tariff_active_block_6_rate_2", U4LE),
    entry(0xfff92b, "tariff_active_block_6_rate_3", U4LE),
    entry(0xfff92c, "tariff_active_block_6_rate_4", U4LE),
    entry(0xfff92d, "tariff_active_block_6_rate_5", U4LE),
    entry(0xfff92e, "tariff_active_block_6_rate_6", U4LE),
    entry(0xfff92f, "tariff_active_block_6_rate_7", U4LE),
    entry(0xfff930, "tariff_active_block_6_rate_8", U4LE),
    entry(0xfff931, "tariff_active_block_7_rate_1", U4LE),
    entry(0xfff932, "tariff_active_block_7_rate_2", U4LE),
    entry(0xfff933, "tariff_active_block_7_rate_3", U4LE),
    entry(0xfff934, "tariff_active_block_7_rate_4", U4LE),
    entry(0xfff935, "tariff_active_block_7_rate_5", U4LE),
    entry(0xfff936, "tariff_active_block_7_rate_6", U4LE),
    entry(0xfff937, "tariff_active_block_7_rate_7", U4LE),
    entry(0xfff938, "tariff_active_block_7_rate_8", U4LE),
    entry(0xfff939, "tariff_active_block_8_rate_1", U4LE),
    entry(0xfff93a, "tariff_active_block_8_rate_2", U4LE),
    entry(0xfff93b, "tariff_active_block_8_rate_3", U4LE),
    entry(0xfff93c, "tariff_active_block_8_rate_4", U4LE),
    entry(0xfff93d, "tariff_active_block_8_rate_5", U4LE),
    entry(0xfff93e, "tariff_active_block_8_rate_6", U4LE),
    entry(0xfff93f, "tariff_active_block_8_rate_7", U4LE),
    entry(0xfff940, "tariff_active_block_8_rate_8", U4LE),
    entry(0xfffd1d, "csq_net_op", CSQ_NET_OP),
    entry(0xffff0d, "prepay_enabled_flag", U1),
    entry(0xffff1e, "tariff_active_threshold_values", THRESHOLD_VALUES),
    entry(0xffff1f, "tariff_future_threshold_values", THRESHOLD_VALUES),
    entry(0xffff20, "tariff_active_threshold_mask", THRESHOLD_MASK),
    entry(0xffff21, "tariff_future_threshold_mask", THRESHOLD_MASK),
    entry(0xffff22, "tariff_active_standing_charge", U4LE),
    entry(0xffff23, "tariff_future_standing_charge", U4LE),
    entry(0xffff24, "tariff_future_activation_datetime", U4LE),
    entry(0xffff2b, "tariff_active_tou_rate_current", U1),
    entry(0xffff2c, "tariff_active_block_rate_current", U1),
    entry(0xffff2d, "tariff_active_price_index_current", U1),
    entry(0xffff2e, "tariff_active_price", U4LE),
    entry(0xffff4b, "tariff_active_element_b_tou_rate_current", U1),
    entry(0xffff4c, "tariff_active_element_b_price_index_current", U1),
    entry(0xffff4d, "tariff_active_element_b_price", U4LE),
    entry(0xffff4e, "tariff_active_tou_flag", RAW),
    entry(0xffff4f, "tariff_future_tou_flag", U1),
    entry(0xfffff8, "element_b", RAW),
    entry(0xfffffc, "element_a", RAW),
];

struct Index {
    by_id: HashMap<ObjectId, &'static ObjectEntry>,
    by_name: HashMap<&'static str, &'static ObjectEntry>,
}

fn index() -> &'static Index {
    static INDEX: OnceLock<Index> = OnceLock::new();
    INDEX.get_or_init(|| Index {
        by_id: OBJECTS.iter().map(|e| (e.id, e)).collect(),
        by_name: OBJECTS.iter().map(|e| (e.name, e)).collect(),
    })
}

/// Shape to decode `id` with. Unknown ids fall back to raw bytes.
pub fn shape_for(id: ObjectId) -> RecordShape {
    lookup(id).map_or(RecordShape::RAW, |e| e.shape)
}

pub fn lookup(id: ObjectId) -> Option<&'static ObjectEntry> {
    index().by_id.get(&id).copied()
}

pub fn by_name(name: &str) -> Option<&'static ObjectEntry> {
    index().by_name.get(name).copied()
}

/// Name of `id`, or its hex form when unknown
pub fn name_of(id: ObjectId) -> String {
    lookup(id).map_or_else(|| id.to_string(), |e| e.name.to_string())
}

/// Tariff price object for `block` and `rate` (both 1-8)
pub fn tariff_block_rate(active: bool, block: u8, rate: u8) -> Option<ObjectId> {
    if !(1..=8).contains(&block) || !(1..=8).contains(&rate) {
        return None;
    }
    let base: u32 = if active { 0xfff900 } else { 0xfff800 };
    Some(ObjectId::from_u24(
        base + u32::from(block - 1) * 8 + u32::from(rate),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_and_names_unique() {
        let ids: HashSet<_> = OBJECTS.iter().map(|e| e.id).collect();
        let names: HashSet<_> = OBJECTS.iter().map(|e| e.name).collect();
        assert_eq!(ids.len(), OBJECTS.len());
        assert_eq!(names.len(), OBJECTS.len());
    }

    #[test]
    fn test_table_sorted_by_id() {
        assert!(OBJECTS.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_known_ids() {
        let serial = by_name("serial").unwrap();
        assert_eq!(serial.id.value(), 0x600100);
        assert_eq!(serial.shape, RecordShape::Ascii(Width::Remainder));

        let prepay = by_name("prepay_enabled_flag").unwrap();
        assert_eq!(prepay.id.value(), 0xffff0d);
        assert_eq!(shape_for(prepay.id), RecordShape::U1);

        assert_eq!(shape_for(ObjectId::from_u24(0xffc802)), RecordShape::S4Le);
        assert_eq!(shape_for(ObjectId::from_u24(0x800800)), RecordShape::Time);
    }

    #[test]
    fn test_current_rate_indicators_named_alike() {
        for (id, name) in [
            (0xffff2b, "tariff_active_tou_rate_current"),
            (0xffff2c, "tariff_active_block_rate_current"),
            (0xffff2d, "tariff_active_price_index_current"),
            (0xffff4b, "tariff_active_element_b_tou_rate_current"),
            (0xffff4c, "tariff_active_element_b_price_index_current"),
        ] {
            assert_eq!(name_of(ObjectId::from_u24(id)), name);
            assert_eq!(by_name(name).unwrap().shape, RecordShape::U1);
        }
        assert!(by_name("tariff_active_element_b_tou_rate").is_none());
    }

    #[test]
    fn test_unknown_id_falls_back_to_raw() {
        let unknown = ObjectId::from_u24(0x123456);
        assert!(lookup(unknown).is_none());
        assert_eq!(shape_for(unknown), RecordShape::RAW);
        assert_eq!(name_of(unknown), "123456");
    }

    #[test]
    fn test_block_rate_ids() {
        let id = tariff_block_rate(false, 8, 1).unwrap();
        assert_eq!(id.value(), 0xfff839);
        assert_eq!(lookup(id).unwrap().name, "tariff_future_block_8_rate_1");

        let id = tariff_block_rate(true, 1, 1).unwrap();
        assert_eq!(lookup(id).unwrap().name, "tariff_active_block_1_rate_1");

        assert!(tariff_block_rate(true, 0, 1).is_none());
        assert!(tariff_block_rate(true, 1, 9).is_none());
    }

    #[test]
    fn test_every_block_rate_registered() {
        for active in [true, false] {
            for block in 1..=8 {
                for rate in 1..=8 {
                    let id = tariff_block_rate(active, block, rate).unwrap();
                    assert_eq!(shape_for(id), RecordShape::U4Le);
                }
            }
        }
    }
}
