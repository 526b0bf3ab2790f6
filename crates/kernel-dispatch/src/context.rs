//! Thread-local device and stream selection.
//!
//! A dispatch call pins the target device with a [`DeviceGuard`] for its duration and hands
//! kernels the [`ExecutionContext`] resolved from the current stream selection. Guards nest
//! and restore the previous selection when dropped.

use std::cell::RefCell;
use std::fmt;

use crate::tensor::Device;

thread_local! {
    static DEVICE_STACK: RefCell<Vec<Device>> = const { RefCell::new(Vec::new()) };
    static STREAM_STACK: RefCell<Vec<(Device, StreamId)>> = const { RefCell::new(Vec::new()) };
}

/// Identifier of an ordered work queue on a device. Stream 0 is the default stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    pub const DEFAULT: StreamId = StreamId(0);
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// Device and stream a kernel must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub device: Device,
    pub stream: StreamId,
}

/// Makes `device` the thread's current device until dropped.
#[must_use = "the device is only selected while the guard is alive"]
pub struct DeviceGuard {
    device: Device,
}

impl DeviceGuard {
    pub fn new(device: Device) -> Self {
        DEVICE_STACK.with(|stack| stack.borrow_mut().push(device));
        DeviceGuard { device }
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        DEVICE_STACK.with(|stack| {
            let _ = stack.borrow_mut().pop();
        });
    }
}

/// Selects `stream` for work issued to `device` until dropped.
#[must_use = "the stream is only selected while the guard is alive"]
pub struct StreamGuard {
    device: Device,
    stream: StreamId,
}

impl StreamGuard {
    pub fn new(device: Device, stream: StreamId) -> Self {
        STREAM_STACK.with(|stack| stack.borrow_mut().push((device, stream)));
        StreamGuard { device, stream }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        STREAM_STACK.with(|stack| {
            let _ = stack.borrow_mut().pop();
        });
    }
}

/// Innermost device selected on this thread, if any.
pub fn current_device() -> Option<Device> {
    DEVICE_STACK.with(|stack| stack.borrow().last().copied())
}

/// Innermost stream selected for `device` on this thread, or the default stream.
pub fn current_stream(device: Device) -> StreamId {
    STREAM_STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|(selected, _)| *selected == device)
            .map_or(StreamId::DEFAULT, |(_, stream)| *stream)
    })
}

pub fn current_context(device: Device) -> ExecutionContext {
    ExecutionContext {
        device,
        stream: current_stream(device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_restore() {
        assert_eq!(current_device(), None);
        {
            let _outer = DeviceGuard::new(Device::cuda(0));
            {
                let _inner = DeviceGuard::new(Device::cuda(1));
                assert_eq!(current_device(), Some(Device::cuda(1)));
            }
            assert_eq!(current_device(), Some(Device::cuda(0)));
        }
        assert_eq!(current_device(), None);
    }

    #[test]
    fn streams_are_selected_per_device() {
        let gpu0 = Device::cuda(0);
        let gpu1 = Device::cuda(1);
        let _stream = StreamGuard::new(gpu1, StreamId(3));
        assert_eq!(current_context(gpu1).stream, StreamId(3));
        assert_eq!(current_context(gpu0).stream, StreamId::DEFAULT);
        {
            let _nested = StreamGuard::new(gpu1, StreamId(7));
            assert_eq!(current_stream(gpu1), StreamId(7));
        }
        assert_eq!(current_stream(gpu1), StreamId(3));
    }
}
