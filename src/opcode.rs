//! Module command opcodes

pub const VERSION: u8 = 0x03;
pub const BOOT_FIRMWARE: u8 = 0x04;
pub const SET_BAUD_RATE: u8 = 0x06;
pub const GET_CURRENT_PROGRAM: u8 = 0x0C;

pub const READ_TAG_ID_SINGLE: u8 = 0x21;
pub const READ_TAG_ID_MULTIPLE: u8 = 0x22;
pub const WRITE_TAG_ID: u8 = 0x23;
pub const WRITE_TAG_DATA: u8 = 0x24;
pub const LOCK_TAG: u8 = 0x25;
pub const KILL_TAG: u8 = 0x26;
pub const READ_TAG_DATA: u8 = 0x28;
pub const GET_TAG_ID_BUFFER: u8 = 0x29;
pub const CLEAR_TAG_ID_BUFFER: u8 = 0x2A;
pub const WRITE_TAG_SPECIFIC: u8 = 0x2D;
pub const MULTI_PROTOCOL_TAG_OP: u8 = 0x2F;

pub const GET_ANTENNA_PORT: u8 = 0x61;
pub const GET_READ_TX_POWER: u8 = 0x62;
pub const GET_TAG_PROTOCOL: u8 = 0x63;
pub const GET_WRITE_TX_POWER: u8 = 0x64;
pub const GET_FREQ_HOP_TABLE: u8 = 0x65;
pub const GET_USER_GPIO_INPUTS: u8 = 0x66;
pub const GET_REGION: u8 = 0x67;
pub const GET_POWER_MODE: u8 = 0x68;
pub const GET_USER_MODE: u8 = 0x69;
pub const GET_READER_OPTIONAL_PARAMS: u8 = 0x6A;
pub const GET_PROTOCOL_PARAM: u8 = 0x6B;
pub const GET_AVAILABLE_PROTOCOLS: u8 = 0x70;
pub const GET_AVAILABLE_REGIONS: u8 = 0x71;
pub const GET_TEMPERATURE: u8 = 0x72;

pub const SET_ANTENNA_PORT: u8 = 0x91;
pub const SET_READ_TX_POWER: u8 = 0x92;
pub const SET_TAG_PROTOCOL: u8 = 0x93;
pub const SET_WRITE_TX_POWER: u8 = 0x94;
pub const SET_FREQ_HOP_TABLE: u8 = 0x95;
pub const SET_USER_GPIO_OUTPUTS: u8 = 0x96;
pub const SET_REGION: u8 = 0x97;
pub const SET_POWER_MODE: u8 = 0x98;
pub const SET_USER_MODE: u8 = 0x99;
pub const SET_READER_OPTIONAL_PARAMS: u8 = 0x9A;
pub const SET_PROTOCOL_PARAM: u8 = 0x9B;
