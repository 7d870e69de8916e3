// SPDX-License-Identifier: Apache-2.0
// Copyright 2021 Keylime Authors

use crate::error::{PcrError, Result};
use log::*;
use std::{
    str::FromStr,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};
use tss_esapi::{
    constants::CapabilityType,
    structures::{CapabilityData, DigestList, PcrSelectionList},
    tcti_ldr::TctiNameConf,
};

/// The TPM operations PCR policies are built on.
///
/// The device is owned by the caller and must not be shared by concurrent
/// requests; nothing here opens, closes or caches it.
pub trait PcrDevice {
    /// Queries `property_count` values of `capability`, starting at
    /// `property`. The boolean is set when more data is available.
    fn get_capability(
        &mut self,
        capability: CapabilityType,
        property: u32,
        property_count: u32,
    ) -> tss_esapi::Result<(CapabilityData, bool)>;

    /// Reads the selected PCRs. The TPM returns at most 8 digests per call
    /// together with the selection it actually read.
    fn pcr_read(
        &mut self,
        selection_list: PcrSelectionList,
    ) -> tss_esapi::Result<(u32, PcrSelectionList, DigestList)>;
}

impl PcrDevice for tss_esapi::Context {
    fn get_capability(
        &mut self,
        capability: CapabilityType,
        property: u32,
        property_count: u32,
    ) -> tss_esapi::Result<(CapabilityData, bool)> {
        tss_esapi::Context::get_capability(
            self,
            capability,
            property,
            property_count,
        )
    }

    fn pcr_read(
        &mut self,
        selection_list: PcrSelectionList,
    ) -> tss_esapi::Result<(u32, PcrSelectionList, DigestList)> {
        self.execute_without_session(|ctx| ctx.pcr_read(selection_list))
    }
}

/// Wrapper around the process-wide tss_esapi::Context.
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<Mutex<tss_esapi::Context>>,
}

static TPM_CTX: OnceLock<Arc<Mutex<tss_esapi::Context>>> = OnceLock::new();

impl Context {
    /// Creates a connection context.
    ///
    /// The TCTI is taken from `tcti`, then from the `TCTI` environment
    /// variable, then from the first TPM device found. Only the first call
    /// opens the TPM; later calls share that connection.
    pub fn new(tcti: Option<&str>) -> Result<Self> {
        if let Some(ctx) = TPM_CTX.get() {
            return Ok(Self {
                inner: Arc::clone(ctx),
            });
        }

        let tcti_path = match tcti.filter(|t| !t.is_empty()) {
            Some(path) => path.to_string(),
            None => match std::env::var("TCTI") {
                Ok(val) => val,
                Err(_) => if std::path::Path::new("/dev/tpmrm0").exists() {
                    "device:/dev/tpmrm0"
                } else {
                    "device:/dev/tpm0"
                }
                .to_string(),
            },
        };

        let tcti = TctiNameConf::from_str(&tcti_path).map_err(|error| {
            PcrError::TctiNameError {
                path: tcti_path.to_string(),
                source: error,
            }
        })?;

        let mut tpmctx = tss_esapi::Context::new(tcti)
            .map_err(|source| PcrError::TSSTctiContextError { source })?;

        // Retrieve the TPM Vendor, this allows us to warn if someone is using a
        // Software TPM ("SW")
        match tss_esapi::utils::get_tpm_vendor(&mut tpmctx) {
            Ok(vendor) if vendor.contains("SW") => {
                warn!("INSECURE: PCR policies are evaluated against a software TPM emulator rather than a real hardware TPM.");
                warn!("INSECURE: Sealed data is NOT linked to a hardware root of trust.");
            }
            Ok(vendor) => debug!("Connected to TPM from vendor {vendor}"),
            Err(e) => debug!("Could not read TPM vendor: {e}"),
        }

        let ctx = TPM_CTX.get_or_init(|| Arc::new(Mutex::new(tpmctx)));
        Ok(Self {
            inner: Arc::clone(ctx),
        })
    }
}

impl PcrDevice for Context {
    fn get_capability(
        &mut self,
        capability: CapabilityType,
        property: u32,
        property_count: u32,
    ) -> tss_esapi::Result<(CapabilityData, bool)> {
        let mut ctx =
            self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        PcrDevice::get_capability(
            &mut *ctx,
            capability,
            property,
            property_count,
        )
    }

    fn pcr_read(
        &mut self,
        selection_list: PcrSelectionList,
    ) -> tss_esapi::Result<(u32, PcrSelectionList, DigestList)> {
        let mut ctx =
            self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        PcrDevice::pcr_read(&mut *ctx, selection_list)
    }
}
