//! Controlled vocabularies the label generator understands.
//!
//! Producers spell these inconsistently ("Pooled Library", "POOLED_LIBRARY", "pooledLibrary"),
//! so matching ignores case, spaces and punctuation.

pub trait Vocabulary: Sized + Copy + 'static {
    const ALL: &'static [Self];

    fn label(self) -> &'static str;

    fn parse(value: &str) -> Option<Self> {
        let wanted = normalize(value);
        if wanted.is_empty() {
            return None;
        }
        Self::ALL
            .iter()
            .copied()
            .find(|term| normalize(term.label()) == wanted)
    }

    fn is_member(value: &str) -> bool {
        Self::parse(value).is_some()
    }
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecimenType {
    Biopsy,
    Blood,
    CellLine,
    CfDna,
    Exosome,
    Fingernails,
    Organoid,
    Other,
    Pdx,
    RapidAutopsy,
    Resection,
    Saliva,
    Xenograft,
    XenograftDerivedCellLine,
}

impl SpecimenType {
    /// Model systems whose label is driven by the CMO sample class.
    pub fn needs_sample_class(self) -> bool {
        matches!(
            self,
            SpecimenType::CellLine
                | SpecimenType::Pdx
                | SpecimenType::Xenograft
                | SpecimenType::XenograftDerivedCellLine
                | SpecimenType::Organoid
        )
    }

    /// Liquid specimens whose label is driven by the sample origin.
    pub fn needs_sample_origin(self) -> bool {
        matches!(self, SpecimenType::Exosome | SpecimenType::CfDna)
    }
}

impl Vocabulary for SpecimenType {
    const ALL: &'static [Self] = &[
        SpecimenType::Biopsy,
        SpecimenType::Blood,
        SpecimenType::CellLine,
        SpecimenType::CfDna,
        SpecimenType::Exosome,
        SpecimenType::Fingernails,
        SpecimenType::Organoid,
        SpecimenType::Other,
        SpecimenType::Pdx,
        SpecimenType::RapidAutopsy,
        SpecimenType::Resection,
        SpecimenType::Saliva,
        SpecimenType::Xenograft,
        SpecimenType::XenograftDerivedCellLine,
    ];

    fn label(self) -> &'static str {
        match self {
            SpecimenType::Biopsy => "Biopsy",
            SpecimenType::Blood => "Blood",
            SpecimenType::CellLine => "CellLine",
            SpecimenType::CfDna => "cfDNA",
            SpecimenType::Exosome => "Exosome",
            SpecimenType::Fingernails => "Fingernails",
            SpecimenType::Organoid => "Organoid",
            SpecimenType::Other => "Other",
            SpecimenType::Pdx => "PDX",
            SpecimenType::RapidAutopsy => "Rapid Autopsy",
            SpecimenType::Resection => "Resection",
            SpecimenType::Saliva => "Saliva",
            SpecimenType::Xenograft => "Xenograft",
            SpecimenType::XenograftDerivedCellLine => "XenograftDerivedCellLine",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmoSampleClass {
    UnknownTumor,
    LocalRecurrence,
    Primary,
    Recurrence,
    Metastasis,
    Normal,
    AdjacentNormal,
    AdjacentTissue,
}

impl Vocabulary for CmoSampleClass {
    const ALL: &'static [Self] = &[
        CmoSampleClass::UnknownTumor,
        CmoSampleClass::LocalRecurrence,
        CmoSampleClass::Primary,
        CmoSampleClass::Recurrence,
        CmoSampleClass::Metastasis,
        CmoSampleClass::Normal,
        CmoSampleClass::AdjacentNormal,
        CmoSampleClass::AdjacentTissue,
    ];

    fn label(self) -> &'static str {
        match self {
            CmoSampleClass::UnknownTumor => "Unknown Tumor",
            CmoSampleClass::LocalRecurrence => "Local Recurrence",
            CmoSampleClass::Primary => "Primary",
            CmoSampleClass::Recurrence => "Recurrence",
            CmoSampleClass::Metastasis => "Metastasis",
            CmoSampleClass::Normal => "Normal",
            CmoSampleClass::AdjacentNormal => "Adjacent Normal",
            CmoSampleClass::AdjacentTissue => "Adjacent Tissue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrigin {
    Urine,
    CerebrospinalFluid,
    Plasma,
    BuffyCoat,
    WholeBlood,
    Tissue,
    Block,
    Slides,
    Curls,
    Saliva,
    CellPellet,
    BoneMarrow,
    PleuralFluid,
    SortedCells,
}

impl Vocabulary for SampleOrigin {
    const ALL: &'static [Self] = &[
        SampleOrigin::Urine,
        SampleOrigin::CerebrospinalFluid,
        SampleOrigin::Plasma,
        SampleOrigin::BuffyCoat,
        SampleOrigin::WholeBlood,
        SampleOrigin::Tissue,
        SampleOrigin::Block,
        SampleOrigin::Slides,
        SampleOrigin::Curls,
        SampleOrigin::Saliva,
        SampleOrigin::CellPellet,
        SampleOrigin::BoneMarrow,
        SampleOrigin::PleuralFluid,
        SampleOrigin::SortedCells,
    ];

    fn label(self) -> &'static str {
        match self {
            SampleOrigin::Urine => "Urine",
            SampleOrigin::CerebrospinalFluid => "Cerebrospinal Fluid",
            SampleOrigin::Plasma => "Plasma",
            SampleOrigin::BuffyCoat => "Buffy Coat",
            SampleOrigin::WholeBlood => "Whole Blood",
            SampleOrigin::Tissue => "Tissue",
            SampleOrigin::Block => "Block",
            SampleOrigin::Slides => "Slides",
            SampleOrigin::Curls => "Curls",
            SampleOrigin::Saliva => "Saliva",
            SampleOrigin::CellPellet => "Cell Pellet",
            SampleOrigin::BoneMarrow => "Bone Marrow",
            SampleOrigin::PleuralFluid => "Pleural Fluid",
            SampleOrigin::SortedCells => "Sorted Cells",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    BlocksSlides,
    Blood,
    BuffyCoat,
    Cdna,
    CdnaLibrary,
    Cells,
    CfDna,
    Dna,
    DnaCdnaLibrary,
    DnaLibrary,
    Nuclei,
    Plasma,
    PooledLibrary,
    Rna,
    Tissue,
}

impl Vocabulary for SampleType {
    const ALL: &'static [Self] = &[
        SampleType::BlocksSlides,
        SampleType::Blood,
        SampleType::BuffyCoat,
        SampleType::Cdna,
        SampleType::CdnaLibrary,
        SampleType::Cells,
        SampleType::CfDna,
        SampleType::Dna,
        SampleType::DnaCdnaLibrary,
        SampleType::DnaLibrary,
        SampleType::Nuclei,
        SampleType::Plasma,
        SampleType::PooledLibrary,
        SampleType::Rna,
        SampleType::Tissue,
    ];

    fn label(self) -> &'static str {
        match self {
            SampleType::BlocksSlides => "Blocks/Slides",
            SampleType::Blood => "Blood",
            SampleType::BuffyCoat => "Buffy Coat",
            SampleType::Cdna => "cDNA",
            SampleType::CdnaLibrary => "cDNA Library",
            SampleType::Cells => "Cells",
            SampleType::CfDna => "cfDNA",
            SampleType::Dna => "DNA",
            SampleType::DnaCdnaLibrary => "DNA/cDNA Library",
            SampleType::DnaLibrary => "DNA Library",
            SampleType::Nuclei => "Nuclei",
            SampleType::Plasma => "Plasma",
            SampleType::PooledLibrary => "Pooled Library",
            SampleType::Rna => "RNA",
            SampleType::Tissue => "Tissue",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_case_and_punctuation() {
        assert_eq!(
            SampleType::parse("pooled library"),
            Some(SampleType::PooledLibrary)
        );
        assert_eq!(
            SampleType::parse("POOLED_LIBRARY"),
            Some(SampleType::PooledLibrary)
        );
        assert_eq!(
            SpecimenType::parse("cellline"),
            Some(SpecimenType::CellLine)
        );
        assert_eq!(SpecimenType::parse("CFDNA"), Some(SpecimenType::CfDna));
        assert_eq!(
            CmoSampleClass::parse("Unknown Tumor"),
            Some(CmoSampleClass::UnknownTumor)
        );
        assert_eq!(
            SampleOrigin::parse("whole_blood"),
            Some(SampleOrigin::WholeBlood)
        );
    }

    #[test]
    fn unknown_and_empty_values_are_rejected() {
        assert!(!SpecimenType::is_member("spleen"));
        assert!(!SampleType::is_member(""));
        assert!(!SampleType::is_member(" / "));
    }

    #[test]
    fn specimen_type_routing_groups() {
        assert!(SpecimenType::Pdx.needs_sample_class());
        assert!(SpecimenType::Organoid.needs_sample_class());
        assert!(!SpecimenType::Biopsy.needs_sample_class());
        assert!(SpecimenType::Exosome.needs_sample_origin());
        assert!(!SpecimenType::Blood.needs_sample_origin());
    }
}
