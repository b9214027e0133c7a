// SPDX-License-Identifier: MPL-2.0

pub(crate) use alloc::{
    borrow::ToOwned,
    boxed::Box,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::fmt::Debug;

pub(crate) use log::{debug, warn};
pub(crate) use spin::Mutex;

pub(crate) use crate::error::{Error, FsError, Result};
pub(crate) use crate::utils::{align4, now, Dirty, UnixTime};
