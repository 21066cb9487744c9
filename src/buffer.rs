//! Python buffer over decoded image bytes.
//!
//! Exposes the `Bytes` inside a cached [`DecodedImage`] through Python's
//! buffer protocol, so a `QImage` or `memoryview` can wrap the pixels
//! without a copy.

use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::Arc;

use pyo3::exceptions::PyBufferError;
use pyo3::ffi;
use pyo3::prelude::*;

use crate::decoder::DecodedImage;

/// Read-only buffer over one decoded image.
#[pyclass]
pub struct ImageBuffer {
    image: Arc<DecodedImage>,
}

impl ImageBuffer {
    pub fn new(image: Arc<DecodedImage>) -> Self {
        Self { image }
    }
}

#[pymethods]
impl ImageBuffer {
    fn __len__(&self) -> usize {
        self.image.data.len()
    }

    #[getter]
    fn width(&self) -> u32 {
        self.image.width
    }

    #[getter]
    fn height(&self) -> u32 {
        self.image.height
    }

    /// Bytes per row.
    #[getter]
    fn stride(&self) -> usize {
        self.image.stride
    }

    #[getter]
    fn bytes_per_pixel(&self) -> usize {
        self.image.format.bytes_per_pixel()
    }

    /// # Safety
    /// CPython calls this with a valid `Py_buffer*` or NULL.
    unsafe fn __getbuffer__(
        slf: Bound<'_, Self>,
        view: *mut ffi::Py_buffer,
        flags: c_int,
    ) -> PyResult<()> {
        if view.is_null() {
            return Err(PyBufferError::new_err("View is null"));
        }
        if (flags & ffi::PyBUF_WRITABLE) == ffi::PyBUF_WRITABLE {
            return Err(PyBufferError::new_err("Image buffers are read-only"));
        }

        let format = if (flags & ffi::PyBUF_FORMAT) == ffi::PyBUF_FORMAT {
            CString::new("B")
                .map_err(|e| PyBufferError::new_err(e.to_string()))?
                .into_raw()
        } else {
            ptr::null_mut()
        };

        let (buf, len) = {
            let borrowed = slf.borrow();
            (borrowed.image.data.as_ptr(), borrowed.image.data.len())
        };

        // The exporter keeps the image (and its Bytes) alive
        (*view).obj = slf.into_any().into_ptr();
        (*view).buf = buf as *mut c_void;
        (*view).len = len as isize;
        (*view).readonly = 1;
        (*view).itemsize = 1;
        (*view).format = format;
        (*view).ndim = 1;
        (*view).shape = if (flags & ffi::PyBUF_ND) == ffi::PyBUF_ND {
            &mut (*view).len
        } else {
            ptr::null_mut()
        };
        (*view).strides = if (flags & ffi::PyBUF_STRIDES) == ffi::PyBUF_STRIDES {
            &mut (*view).itemsize
        } else {
            ptr::null_mut()
        };
        (*view).suboffsets = ptr::null_mut();
        (*view).internal = ptr::null_mut();

        Ok(())
    }

    /// # Safety
    /// CPython calls this with a `Py_buffer*` previously filled by `__getbuffer__`.
    unsafe fn __releasebuffer__(&self, view: *mut ffi::Py_buffer) {
        if view.is_null() {
            return;
        }
        if !(*view).format.is_null() {
            drop(CString::from_raw((*view).format));
            (*view).format = ptr::null_mut();
        }
    }
}
