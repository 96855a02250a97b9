//! Annex-B 字节流处理
//!
//! 按 3 字节 (00 00 01) 或 4 字节 (00 00 00 01) 起始码切分 NAL 单元。

use bytes::{BufMut, Bytes, BytesMut};

pub const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL 类型：非 IDR 片
pub const NAL_TYPE_SLICE: u8 = 1;
/// NAL 类型：IDR 片
pub const NAL_TYPE_IDR: u8 = 5;

/// NAL 单元类型（首字节低 5 位）
pub fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| b & 0x1F)
}

/// 是否为视频编码层片（决定时间戳是否前进）
pub fn is_vcl(nal: &[u8]) -> bool {
    matches!(nal_type(nal), Some(NAL_TYPE_SLICE | NAL_TYPE_IDR))
}

/// 从 `from` 开始查找下一个起始码，返回 (起始码位置, 起始码长度)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// 切分 Annex-B 流，丢弃空单元；开头没有起始码时第一段也当作 NAL 单元
pub fn split_nal_units(data: &[u8]) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut start = match find_start_code(data, 0) {
        Some((0, len)) => len,
        _ => 0,
    };

    loop {
        match find_start_code(data, start) {
            Some((pos, len)) => {
                push_unit(&mut units, &data[start..pos]);
                start = pos + len;
            }
            None => {
                push_unit(&mut units, &data[start..]);
                break;
            }
        }
    }
    units
}

fn push_unit(units: &mut Vec<Bytes>, unit: &[u8]) {
    // 4 字节起始码前的零属于 trailing_zero_8bits
    let mut end = unit.len();
    while end > 0 && unit[end - 1] == 0 {
        end -= 1;
    }
    if end > 0 {
        units.push(Bytes::copy_from_slice(&unit[..end]));
    }
}

/// 把 NAL 单元写成 Annex-B（4 字节起始码）
pub fn write_nal_unit(out: &mut BytesMut, nal: &[u8]) {
    out.put_slice(&START_CODE);
    out.put_slice(nal);
}
