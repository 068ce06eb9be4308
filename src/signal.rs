//! RedRat XML key-database parsing: one [`SignalRecord`] per IR key.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{Error, Result};

const MIN_INTRA_SIG_PAUSE_CYCLES: i64 = 10;

/// A single IR key, normalized to carrier-cycle pulse/space sequences.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignalRecord {
    pub name: String,
    #[serde(rename = "Frequency")]
    pub frequency: u32,
    #[serde(rename = "BaseSequence")]
    pub base_sequence: Vec<u32>,
    #[serde(rename = "RepeatSequence")]
    pub repeat_sequence: Vec<u32>,
    #[serde(rename = "DefaultRepeats")]
    pub default_repeats: u32,
    #[serde(rename = "BaseSequenceMicros")]
    pub base_sequence_micros: u64,
    #[serde(rename = "RepeatSequenceMicros")]
    pub repeat_sequence_micros: u64,
}

impl SignalRecord {
    /// Builds a record from just the fields a caller is likely to supply by hand,
    /// deriving the micros fields the scheduler needs. Mirrors the defensive
    /// derivation the dispatcher performs when a caller-supplied signal is missing
    /// them.
    pub fn new(
        name: impl Into<String>,
        frequency: u32,
        base_sequence: Vec<u32>,
        repeat_sequence: Vec<u32>,
        default_repeats: Option<u32>,
    ) -> Self {
        let period_micros = 1_000_000.0 / frequency as f64;
        let base_sequence_micros =
            (base_sequence.iter().sum::<u32>() as f64 * period_micros).round() as u64;
        let repeat_sequence_micros =
            (repeat_sequence.iter().sum::<u32>() as f64 * period_micros).round() as u64;
        SignalRecord {
            name: name.into(),
            frequency,
            base_sequence,
            repeat_sequence,
            default_repeats: default_repeats.unwrap_or(1),
            base_sequence_micros,
            repeat_sequence_micros,
        }
    }
}

/// One `AVDevice` entry: a device name plus every key parsed from its `Signals`.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub name: String,
    pub keys: Vec<SignalRecord>,
}

/// Parses a full RedRat `AVDeviceDB` XML document.
pub fn parse_redrat_xml(xml: &str) -> Result<Vec<DeviceRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut devices = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::DatasetLoadError(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"AVDevice" => {
                devices.push(parse_av_device(&mut reader)?);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(devices)
}

fn parse_av_device(reader: &mut Reader<&[u8]>) -> Result<DeviceRecord> {
    let mut name = String::new();
    let mut keys = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::DatasetLoadError(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"DeviceName" => {
                name = read_text(reader)?;
            }
            Event::Start(e) if e.name().as_ref() == b"Signals" => {
                keys = parse_signals(reader)?;
            }
            Event::End(e) if e.name().as_ref() == b"AVDevice" => break,
            Event::Eof => return Err(Error::DatasetLoadError("unexpected EOF in AVDevice".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(DeviceRecord { name, keys })
}

fn read_text(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::DatasetLoadError(e.to_string()))?
        {
            Event::Text(t) => {
                text.push_str(
                    &t.unescape()
                        .map_err(|e| Error::DatasetLoadError(e.to_string()))?,
                );
            }
            Event::End(_) => break,
            Event::Eof => return Err(Error::DatasetLoadError("unexpected EOF reading text".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(text.trim().to_string())
}

fn parse_signals(reader: &mut Reader<&[u8]>) -> Result<Vec<SignalRecord>> {
    let mut keys = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::DatasetLoadError(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"IRPacket" => {
                let is_double_signal = e.attributes().flatten().any(|a| {
                    a.key.as_ref() == b"xsi:type" && a.value.as_ref() == b"DoubleSignal"
                });
                if is_double_signal {
                    skip_to_end(reader, b"IRPacket")?;
                } else if let Some(record) = parse_ir_packet(reader)? {
                    keys.push(record);
                }
            }
            Event::End(e) if e.name().as_ref() == b"Signals" => break,
            Event::Eof => return Err(Error::DatasetLoadError("unexpected EOF in Signals".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(keys)
}

fn skip_to_end(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 1;
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::DatasetLoadError(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == tag => depth += 1,
            Event::End(e) if e.name().as_ref() == tag => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Event::Eof => return Err(Error::DatasetLoadError("unexpected EOF while skipping".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn parse_lengths(reader: &mut Reader<&[u8]>) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::DatasetLoadError(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"double" => {
                let text = read_text(reader)?;
                out.push(
                    text.parse()
                        .map_err(|_| Error::DatasetLoadError(format!("invalid length {text:?}")))?,
                );
            }
            Event::End(e) if e.name().as_ref() == b"Lengths" => break,
            Event::Eof => return Err(Error::DatasetLoadError("unexpected EOF in Lengths".into())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn parse_ir_packet(reader: &mut Reader<&[u8]>) -> Result<Option<SignalRecord>> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut lengths: Option<Vec<f64>> = None;
    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::DatasetLoadError(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"Lengths" => {
                lengths = Some(parse_lengths(reader)?);
            }
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let text = read_text(reader)?;
                fields.insert(name, text);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                fields.insert(name, String::new());
            }
            Event::End(e) if e.name().as_ref() == b"IRPacket" => break,
            Event::Eof => return Err(Error::DatasetLoadError("unexpected EOF in IRPacket".into())),
            _ => {}
        }
        buf.clear();
    }
    let Some(lengths) = lengths else { return Ok(None) };
    build_signal_record(&fields, &lengths).map(Some)
}

fn build_signal_record(fields: &HashMap<String, String>, lengths: &[f64]) -> Result<SignalRecord> {
    let get = |key: &str| -> Result<&String> {
        fields
            .get(key)
            .ok_or_else(|| Error::DatasetLoadError(format!("missing {key} in IRPacket")))
    };
    let sig_data = get("SigData")?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sig_data)
        .map_err(|e| Error::DatasetLoadError(format!("bad SigData base64: {e}")))?;
    let mut parts = decoded.splitn(3, |&b| b == 0x7f);
    let base_idx = parts.next().unwrap_or(&[]);
    let repeat_idx = parts.next().unwrap_or(&[]);

    let lookup = |indices: &[u8]| -> Result<Vec<f64>> {
        indices
            .iter()
            .map(|&i| {
                lengths
                    .get(i as usize)
                    .copied()
                    .ok_or_else(|| Error::DatasetLoadError(format!("length index {i} out of range")))
            })
            .collect()
    };
    let base_time = lookup(base_idx)?;
    let repeat_time = lookup(repeat_idx)?;

    let freq: u32 = get("ModulationFreq")?
        .parse::<f64>()
        .map_err(|_| Error::DatasetLoadError("invalid ModulationFreq".into()))?
        .round() as u32;

    let to_cycles = |times: &[f64]| -> Vec<f64> {
        times.iter().map(|t| t * freq as f64 / 1000.0).collect()
    };
    let mut base_sequence = clean_sequence(&to_cycles(&base_time));
    let mut repeat_sequence = clean_sequence(&to_cycles(&repeat_time));

    let intra_sig_pause_raw = get("IntraSigPause")?
        .parse::<f64>()
        .map_err(|_| Error::DatasetLoadError("invalid IntraSigPause".into()))?
        * freq as f64
        / 1000.0;
    let intra_sig_pause = (intra_sig_pause_raw.round() as i64).max(MIN_INTRA_SIG_PAUSE_CYCLES);

    base_sequence.push(intra_sig_pause);
    if !repeat_sequence.is_empty() {
        repeat_sequence.push(intra_sig_pause);
    }

    if base_sequence.len() % 2 != 0 {
        return Err(Error::DatasetLoadError("BaseSequence has odd length".into()));
    }
    if repeat_sequence.len() % 2 != 0 {
        return Err(Error::DatasetLoadError("RepeatSequence has odd length".into()));
    }

    let base_sequence_micros = (base_sequence.iter().sum::<i64>() as f64 / freq as f64 * 1_000_000.0).round() as u64;
    let repeat_sequence_micros =
        (repeat_sequence.iter().sum::<i64>() as f64 / freq as f64 * 1_000_000.0).round() as u64;

    let default_repeats: u32 = fields
        .get("NoRepeats")
        .or_else(|| fields.get("RRNoRepeats"))
        .ok_or_else(|| Error::DatasetLoadError("missing NoRepeats".into()))?
        .parse()
        .map_err(|_| Error::DatasetLoadError("invalid NoRepeats".into()))?;

    Ok(SignalRecord {
        name: get("Name")?.clone(),
        frequency: freq,
        base_sequence: base_sequence.into_iter().map(|v| v.max(0) as u32).collect(),
        repeat_sequence: repeat_sequence.into_iter().map(|v| v.max(0) as u32).collect(),
        default_repeats,
        base_sequence_micros,
        repeat_sequence_micros,
    })
}

/// Rounds each pulse and carries its rounding remainder into the following space, so
/// the pair's total duration is preserved to the nearest cycle.
fn clean_sequence(seq: &[f64]) -> Vec<i64> {
    let mut result = Vec::with_capacity(seq.len());
    for chunk in seq.chunks(2) {
        let pulse = chunk[0];
        let rounded_pulse = pulse.round();
        let remainder = pulse - rounded_pulse;
        result.push(rounded_pulse as i64);
        if let [_, space] = chunk {
            result.push((space + remainder).round() as i64);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_sequence_carries_rounding_remainder() {
        // pulse 100.4 rounds to 100 with remainder -0.4, carried into the space.
        let out = clean_sequence(&[100.4, 200.2]);
        assert_eq!(out, vec![100, 200]);
    }

    #[test]
    fn clean_sequence_handles_trailing_pulse_without_space() {
        let out = clean_sequence(&[10.0, 20.0, 30.0]);
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn parses_minimal_redrat_document() {
        // base64 of [0x00, 0x01, 0x7f, 0x01, 0x00] -> indices [0,1] base, [1,0] repeat
        let sig_data = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            [0u8, 1, 0x7f, 1, 0],
        );
        let xml = format!(
            r#"<AVDeviceDB><AVDevices><AVDevice>
                <DeviceName>TV</DeviceName>
                <Signals>
                    <IRPacket xsi:type="ModulatedSignal">
                        <Name>Power</Name>
                        <ModulationFreq>38000</ModulationFreq>
                        <NoRepeats>5</NoRepeats>
                        <IntraSigPause>20</IntraSigPause>
                        <SigData>{sig_data}</SigData>
                        <Lengths>
                            <double>1.0</double>
                            <double>2.0</double>
                        </Lengths>
                    </IRPacket>
                </Signals>
            </AVDevice></AVDevices></AVDeviceDB>"#
        );
        let devices = parse_redrat_xml(&xml).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "TV");
        let key = &devices[0].keys[0];
        assert_eq!(key.name, "Power");
        assert_eq!(key.frequency, 38000);
        assert_eq!(key.default_repeats, 5);
        assert_eq!(key.base_sequence.len() % 2, 0);
        assert_eq!(key.repeat_sequence.len() % 2, 0);
        assert!(*key.base_sequence.last().unwrap() >= 10);
    }

    #[test]
    fn double_signal_packets_are_skipped() {
        let xml = r#"<AVDeviceDB><AVDevices><AVDevice>
            <DeviceName>TV</DeviceName>
            <Signals>
                <IRPacket xsi:type="DoubleSignal">
                    <Name>Ignored</Name>
                </IRPacket>
            </Signals>
        </AVDevice></AVDevices></AVDeviceDB>"#;
        let devices = parse_redrat_xml(xml).unwrap();
        assert_eq!(devices[0].keys.len(), 0);
    }

    #[test]
    fn packets_without_lengths_are_skipped() {
        let xml = r#"<AVDeviceDB><AVDevices><AVDevice>
            <DeviceName>TV</DeviceName>
            <Signals>
                <IRPacket xsi:type="ModulatedSignal">
                    <Name>NoLengths</Name>
                </IRPacket>
            </Signals>
        </AVDevice></AVDevices></AVDeviceDB>"#;
        let devices = parse_redrat_xml(xml).unwrap();
        assert_eq!(devices[0].keys.len(), 0);
    }
}
