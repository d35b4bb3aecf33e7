// Copyright 2026 The logix Authors. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Transport definition for the ENIP session layer

use super::eip::Identity;
use super::error::Error;

/// an abstract ENIP session used by the client to exchange CPF payloads
///
/// ## How can I implement `Transport`?
///
/// Types that are [`Transport`] own exactly one session to one controller.
/// `register_session` must be called before any send; the implementor
/// adopts the session handle assigned by the controller and stamps it into
/// every subsequent frame. A transport is single-writer: each send must
/// read its reply before the next request is framed.
pub trait Transport {
    /// register the ENIP session with the controller.
    fn register_session(&mut self) -> Result<(), Error>;
    /// send a CPF payload via SendRRData and return the reply CPF.
    fn send_rr_data(&mut self, cpf: &[u8]) -> Result<Vec<u8>, Error>;
    /// send a CPF payload via SendUnitData and return the reply CPF.
    fn send_unit_data(&mut self, cpf: &[u8]) -> Result<Vec<u8>, Error>;
    /// probe the identity of the connected controller.
    fn list_identity(&mut self) -> Result<Identity, Error>;
    /// unregister the session and drop the connection; never fails.
    fn close(&mut self);
}
