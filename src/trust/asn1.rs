/*-
 * #%L
 * vau_httpclient
 * %%
 * (C) akquinet tech@Spree GmbH, 2025, licensed for gematik GmbH
 * %%
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 * *******
 *
 * For additional notes and disclaimer from gematik and in case of changes by gematik find details in the "Readme" file.
 * #L%
 */

use anyhow::{anyhow, bail};
use asn1_rs::*;
use x509_parser::parse_x509_certificate;

pub const OID_ADMISSION: Oid<'static> = oid!(1.3.36.8.3.3);

/// AdmissionSyntax ::= SEQUENCE {
///   admissionAuthority        [0] EXPLICIT GeneralName OPTIONAL,
///   contentsOfAdmissions      SEQUENCE OF Admissions
/// }
#[derive(Debug, DerSequence)]
pub struct AdmissionSyntax<'a> {
    #[tag_explicit(0)]
    #[optional]
    pub _admission_authority: Option<Any<'a>>,

    pub contents_of_admissions: Vec<Admissions<'a>>,
}

impl AdmissionSyntax<'_> {
    pub fn single_profession_info(&self) -> anyhow::Result<&ProfessionInfo<'_>> {
        let admissions = &self.contents_of_admissions;
        if admissions.len() != 1 {
            bail!("Expected exactly 1 Admissions, found {}", admissions.len())
        }
        let profession_info = &admissions[0].profession_infos;
        if profession_info.len() != 1 {
            bail!(
                "Expected exactly 1 ProfessionInfo, found {}",
                profession_info.len()
            )
        }
        Ok(&profession_info[0])
    }

    /// The one profession OID carried by the one ProfessionInfo.
    pub fn single_profession_oid(&self) -> anyhow::Result<&Oid<'_>> {
        let oids = self
            .single_profession_info()?
            .profession_oids
            .as_deref()
            .unwrap_or_default();
        match oids {
            [oid] => Ok(oid),
            _ => bail!("Expected exactly 1 professionOID, found {}", oids.len()),
        }
    }
}

/// Admissions ::= SEQUENCE {
///   admissionAuthority        [0] EXPLICIT GeneralName OPTIONAL,
///   namingAuthority           [1] EXPLICIT NamingAuthority OPTIONAL,
///   professionInfos           SEQUENCE OF ProfessionInfo
/// }
#[derive(Debug, DerSequence)]
pub struct Admissions<'a> {
    #[tag_explicit(0)]
    #[optional]
    pub _admission_authority: Option<Any<'a>>, // ignored
    #[tag_explicit(1)]
    #[optional]
    pub _naming_authority: Option<Any<'a>>, // ignored

    pub profession_infos: Vec<ProfessionInfo<'a>>,
}

/// ProfessionInfo ::= SEQUENCE {
///   namingAuthority    [0] EXPLICIT NamingAuthority OPTIONAL,
///   professionItems    SEQUENCE OF DirectoryString OPTIONAL,
///   professionOIDs     SEQUENCE OF OBJECT IDENTIFIER OPTIONAL,
///   registrationNumber DirectoryString OPTIONAL,
///   addProfessionInfo  OCTET STRING OPTIONAL
/// }
#[derive(Debug, DerSequence)]
pub struct ProfessionInfo<'a> {
    #[tag_explicit(0)]
    #[optional]
    pub _naming_authority: Option<Any<'a>>, // ignored

    #[optional]
    pub _profession_items: Option<Vec<Any<'a>>>, // ignored

    #[optional]
    pub profession_oids: Option<Vec<Oid<'a>>>,

    #[optional]
    pub _registration_number: Option<Any<'a>>, // ignored

    #[optional]
    pub _add_profession_info: Option<&'a [u8]>, // ignored
}

/// Checks that the certificate's admission names exactly `expected` as its profession.
pub fn check_admission(der: &[u8], expected: &Oid<'_>) -> anyhow::Result<()> {
    let (_, cert) = parse_x509_certificate(der).map_err(|e| anyhow!("parse certificate: {e}"))?;
    let admission_syntax = cert
        .extensions()
        .iter()
        .find(|e| e.oid == OID_ADMISSION)
        .ok_or_else(|| anyhow!("Admission extension (OID {}) not found", OID_ADMISSION))?
        .value;

    let (_, admission) = AdmissionSyntax::from_der(admission_syntax)
        .map_err(|e| anyhow!("parse admission: {e}"))?;
    let oid = admission.single_profession_oid()?;
    if oid != expected {
        bail!("profession OID {oid} is not {expected}");
    }
    Ok(())
}
