// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Writes the [IETF-RFC6690] link-format fragments LWM2M needs: Discover's
//! `</oid/iid/rid>;dim=N` listing (§4.8) and the RD client's bare
//! `</oid/iid>,</oid/iid>,...` registration payload (§4.9).
//!
//! Both producers only ever emit a link target plus, for a multi-instance resource, a single
//! numeric `dim` attribute (`lwm2m-engine.c`'s `append_reg_tag`/discovery `;dim=%d` are the only
//! two shapes the original ever writes), so unlike a general-purpose RFC 6690 implementation
//! this module has no reader: nothing in this crate ever needs to parse a link-format payload
//! back out of a CoAP response.
//!
//! [IETF-RFC6690]: https://tools.ietf.org/html/rfc6690

use std::fmt::Write;

/// The `dim` (dimension) attribute: the number of instances of a multi-instance resource,
/// attached to its link in a Discover response (§4.8).
pub const LINK_ATTR_DIMENSION: &str = "dim";

const LINK_SEPARATOR_CHAR: char = ',';
const ATTR_SEPARATOR_CHAR: char = ';';

/// Builds an [IETF-RFC6690] link-format payload one link at a time.
///
/// [IETF-RFC6690]: https://tools.ietf.org/html/rfc6690
#[derive(Debug)]
pub struct LinkFormatWrite<'a, T: ?Sized> {
    write: &'a mut T,
    is_first: bool,
    error: Option<core::fmt::Error>,
}

impl<'a, T: Write + ?Sized> LinkFormatWrite<'a, T> {
    /// Creates a new instance of a `LinkFormatWrite` for a given instance that implements
    /// [`core::fmt::Write`].
    pub fn new(write: &'a mut T) -> LinkFormatWrite<'a, T> {
        LinkFormatWrite { write, is_first: true, error: None }
    }

    /// Adds a link to the link format and returns [`LinkAttributeWrite`] to attach attributes.
    pub fn link<'b>(&'b mut self, link: &str) -> LinkAttributeWrite<'a, 'b, T> {
        if self.is_first {
            self.is_first = false;
        } else if self.error.is_none() {
            self.error = self.write.write_char(LINK_SEPARATOR_CHAR).err();
        }

        if self.error.is_none() {
            self.error = self.write.write_char('<').err();
        }
        if self.error.is_none() {
            self.error = self.write.write_str(link).err();
        }
        if self.error.is_none() {
            self.error = self.write.write_char('>').err();
        }

        LinkAttributeWrite(self)
    }

    /// Consumes this [`LinkFormatWrite`] instance, returning any error that
    /// might have occurred during writing.
    pub fn finish(self) -> Result<(), core::fmt::Error> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Helper for writing link format attributes; created by calling [`LinkFormatWrite::link`].
#[derive(Debug)]
pub struct LinkAttributeWrite<'a, 'b, T: ?Sized>(&'b mut LinkFormatWrite<'a, T>);

impl<'a, 'b, T: Write + ?Sized> LinkAttributeWrite<'a, 'b, T> {
    /// Adds a numeric attribute to the link, e.g. [`LINK_ATTR_DIMENSION`] (`;dim=3`).
    pub fn attr_u16(mut self, key: &'static str, value: u16) -> Self {
        if self.0.error.is_none() {
            self.0.error = self.0.write.write_char(ATTR_SEPARATOR_CHAR).err();
        }
        if self.0.error.is_none() {
            self.0.error = self.0.write.write_str(key).err();
        }
        if self.0.error.is_none() {
            self.0.error = write!(self.0.write, "={}", value).err();
        }
        self
    }

    /// Consumes this [`LinkAttributeWrite`] instance, returning any error that
    /// might have occurred during writing.
    pub fn finish(self) -> Result<(), core::fmt::Error> {
        match self.0.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_bare_links_comma_separated() {
        let mut buffer = String::new();
        let mut write = LinkFormatWrite::new(&mut buffer);

        write.link("/3/0").finish().unwrap();
        write.link("/1/0").finish().unwrap();
        assert_eq!(write.finish(), Ok(()));

        assert_eq!(&buffer, "</3/0>,</1/0>");
    }

    #[test]
    fn writes_dim_attribute_on_a_multi_instance_resource() {
        let mut buffer = String::new();
        let mut write = LinkFormatWrite::new(&mut buffer);

        write.link("/3/0/6").attr_u16(LINK_ATTR_DIMENSION, 2).finish().unwrap();
        assert_eq!(write.finish(), Ok(()));

        assert_eq!(&buffer, "</3/0/6>;dim=2");
    }
}
