// Author: Quayside contributors
// License: MIT

//! Blackbody-approximation colour temperature and shared-memory gamma ramp
//! packing (spec.md §4.6 "Applying a ramp").

use std::ffi::CString;
use std::io::{Seek, SeekFrom, Write};
use std::os::fd::{AsFd, FromRawFd, OwnedFd};

use memmap2::MmapMut;

/// Thin wrapper around the raw `memfd_create(2)` syscall; the crate already
/// depends on `libc` for the login-session liveness probe, so it is reused
/// here rather than pulling in a dedicated memfd crate.
fn memfd_create(name: &str, flags: libc::c_uint) -> std::io::Result<OwnedFd> {
    let name = CString::new(name).expect("memfd name must not contain NUL");
    let fd = unsafe { libc::memfd_create(name.as_ptr(), flags) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// McCamy-style blackbody approximation: Kelvin -> linear RGB multipliers
/// in `[0, 1]`.
pub fn kelvin_to_rgb(temp: f64) -> (f64, f64, f64) {
    let temp = temp.clamp(1000.0, 40000.0) / 100.0;

    let red = if temp <= 66.0 {
        255.0
    } else {
        (329.698_727_446 * (temp - 60.0).powf(-0.133_204_759_2)).clamp(0.0, 255.0)
    };

    let green = if temp <= 66.0 {
        (99.470_802_586_1 * temp.ln() - 161.119_568_166_1).clamp(0.0, 255.0)
    } else {
        (288.122_169_528_3 * (temp - 60.0).powf(-0.075_514_849_2)).clamp(0.0, 255.0)
    };

    let blue = if temp >= 66.0 {
        255.0
    } else if temp <= 19.0 {
        0.0
    } else {
        (138.517_731_223_1 * (temp - 10.0).ln() - 305.044_792_730_7).clamp(0.0, 255.0)
    };

    (red / 255.0, green / 255.0, blue / 255.0)
}

/// Build one channel's 16-bit LUT of the given ramp `size`, applying the
/// channel multiplier and gamma correction.
fn channel_ramp(size: usize, multiplier: f64, gamma: f64) -> Vec<u16> {
    (0..size)
        .map(|i| {
            let normalized = i as f64 / (size.saturating_sub(1).max(1)) as f64;
            let corrected = normalized.powf(gamma) * multiplier;
            (corrected.clamp(0.0, 1.0) * u16::MAX as f64).round() as u16
        })
        .collect()
}

/// Compute all three channel LUTs for a ramp of `size` entries at `temp`
/// Kelvin with the configured `gamma` correction.
pub fn build_ramp(size: usize, temp_kelvin: f64, gamma: f64) -> (Vec<u16>, Vec<u16>, Vec<u16>) {
    let (r_mult, g_mult, b_mult) = kelvin_to_rgb(temp_kelvin);
    (
        channel_ramp(size, r_mult, gamma),
        channel_ramp(size, g_mult, gamma),
        channel_ramp(size, b_mult, gamma),
    )
}

/// Pack three little-endian u16 channel ramps (R, then G, then B) into a
/// freshly created memfd-backed shared-memory file, ready to be handed to
/// the compositor's `SetGamma`. Returns the owned fd; the caller is
/// responsible for keeping it alive until the compositor has read it.
pub fn pack_shm(r: &[u16], g: &[u16], b: &[u16]) -> std::io::Result<OwnedFd> {
    let total_len = (r.len() + g.len() + b.len()) * 2;

    let fd = memfd_create("quayside-gamma-ramp", libc::MFD_CLOEXEC)?;
    let mut file = std::fs::File::from(fd);
    file.set_len(total_len as u64)?;

    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    let mut offset = 0;
    for channel in [r, g, b] {
        for value in channel {
            mmap[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            offset += 2;
        }
    }
    mmap.flush()?;

    file.seek(SeekFrom::Start(0))?;
    Ok(file.as_fd().try_clone_to_owned()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_temperature_is_near_identity() {
        let (r, g, b) = kelvin_to_rgb(6500.0);
        assert!((r - 1.0).abs() < 0.05);
        assert!((g - 1.0).abs() < 0.05);
        assert!((b - 1.0).abs() < 0.05);
    }

    #[test]
    fn low_temperature_attenuates_blue() {
        let (_, _, b_low) = kelvin_to_rgb(3500.0);
        let (_, _, b_high) = kelvin_to_rgb(6500.0);
        assert!(b_low < b_high);
    }

    #[test]
    fn ramp_is_monotonically_increasing_per_channel() {
        let (r, _, _) = build_ramp(256, 6500.0, 1.0);
        for window in r.windows(2) {
            assert!(window[1] >= window[0]);
        }
    }

    #[test]
    fn ramp_respects_requested_size() {
        let (r, g, b) = build_ramp(64, 4000.0, 1.0);
        assert_eq!(r.len(), 64);
        assert_eq!(g.len(), 64);
        assert_eq!(b.len(), 64);
    }
}
