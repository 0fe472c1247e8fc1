//! Tensor handles: the runtime's first-class tensor reference.

use std::fmt;
use std::sync::Arc;

use crate::async_value::{AsyncValue, AsyncValueRef};
use crate::device::Device;
use crate::tensor::{HostTensor, TensorMetadata};

#[derive(Clone, Debug)]
enum MetadataState {
    Available(TensorMetadata),
    Async(AsyncValueRef<TensorMetadata>),
}

/// `{device, metadata, tensor}`: a device reference, tensor metadata that
/// may still be resolving, and the (async) tensor payload. Errors
/// propagate through either the metadata or the payload channel.
#[derive(Clone)]
pub struct TensorHandle {
    device: Arc<Device>,
    metadata: MetadataState,
    tensor: AsyncValueRef<HostTensor>,
}

impl TensorHandle {
    /// Creates a handle with metadata known up front.
    pub fn new(
        device: Arc<Device>,
        metadata: TensorMetadata,
        tensor: AsyncValueRef<HostTensor>,
    ) -> Self {
        Self {
            device,
            metadata: MetadataState::Available(metadata),
            tensor,
        }
    }

    /// Creates a handle whose metadata resolves asynchronously.
    pub fn new_with_async_metadata(
        device: Arc<Device>,
        metadata: AsyncValueRef<TensorMetadata>,
        tensor: AsyncValueRef<HostTensor>,
    ) -> Self {
        Self {
            device,
            metadata: MetadataState::Async(metadata),
            tensor,
        }
    }

    /// The device this handle's tensor lives on.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// `true` once the metadata is known (inline or resolved).
    pub fn is_metadata_available(&self) -> bool {
        match &self.metadata {
            MetadataState::Available(_) => true,
            MetadataState::Async(md) => md.is_concrete(),
        }
    }

    /// The metadata, if known.
    pub fn metadata(&self) -> Option<&TensorMetadata> {
        match &self.metadata {
            MetadataState::Available(md) => Some(md),
            MetadataState::Async(md) if md.is_concrete() => Some(md.get()),
            MetadataState::Async(_) => None,
        }
    }

    /// The metadata as an async value (allocating an available cell when
    /// the metadata was inline).
    pub fn async_metadata(&self) -> AsyncValueRef<TensorMetadata> {
        match &self.metadata {
            MetadataState::Available(md) => AsyncValueRef::available(md.clone()),
            MetadataState::Async(md) => md.clone(),
        }
    }

    /// The async tensor payload.
    pub fn async_tensor(&self) -> &AsyncValueRef<HostTensor> {
        &self.tensor
    }

    /// `true` if either channel has reached the error state.
    pub fn is_error(&self) -> bool {
        if self.tensor.is_error() {
            return true;
        }
        matches!(&self.metadata, MetadataState::Async(md) if md.is_error())
    }

    /// The errored async value of whichever channel failed.
    pub fn error_async_value(&self) -> Option<Arc<AsyncValue>> {
        if self.tensor.is_error() {
            return Some(self.tensor.value().clone());
        }
        if let MetadataState::Async(md) = &self.metadata {
            if md.is_error() {
                return Some(md.value().clone());
            }
        }
        None
    }

    /// The same tensor viewed on another device. Payload bytes are shared;
    /// host-resident tensors need no copy.
    pub fn with_device(&self, device: Arc<Device>) -> TensorHandle {
        TensorHandle {
            device,
            metadata: self.metadata.clone(),
            tensor: self.tensor.clone(),
        }
    }
}

impl fmt::Debug for TensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorHandle")
            .field("device", &self.device.name())
            .field("metadata", &self.metadata())
            .field("tensor_available", &self.tensor.is_available())
            .finish()
    }
}

impl fmt::Display for TensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tensor.is_concrete() {
            return write!(f, "TensorHandle({})", self.tensor.get());
        }
        if self.tensor.is_error() {
            return write!(f, "TensorHandle(error: {})", self.tensor.get_error());
        }
        match self.metadata() {
            Some(md) => write!(f, "TensorHandle(pending, {md})"),
            None => write!(f, "TensorHandle(pending)"),
        }
    }
}
