use crate::{Device, DeviceKind};

pub(crate) fn devices() -> Vec<Device> {
    // TODO: harvest the RAMB36E2 tile table (and with it the frame count)
    // from logic location data for the XCVU9P; until then the device entry
    // only carries the stream-level geometry needed for readback handling.
    vec![Device::new(
        "xcvu9p",
        0x04B31093,
        DeviceKind::VirtexUp,
        93,
        0,
        3,
        Vec::new(),
    )]
}
