mod config;
use log::{debug, info};

use std::collections::{BTreeMap, BTreeSet};

pub use crate::config::*;

// **** Normalizer ****

/// The raw marker for a structural omission, detected before any other
/// normalization rule.
const OMISSION_MARKER: &str = "*om.**";
/// The raw marker for a lacuna.
const LACUNA_MARKER: &str = "_";

/// The closed catalogue of entity escapes found in the transcriptions.
/// There is no consistency in some transcriptions, so every escaped point
/// is listed explicitly. A sequence outside this list is a defect in the
/// input and fails the run.
const ESCAPES: &[(&str, &str)] = &[
    ("&middot;", "·"),
    ("&ugrave;", "ù"),
    ("&ograve;", "ò"),
    ("&#x0303;", "~"), // replacing by a normal (not combining) tilde
    ("&#x00F5;", "õ"),
    ("&#x0103;", "ă"),
    ("&nbsp;", "_"), // replacing by underscore, as spaces are separators
    ("&#x014D;", "ō"),
    ("&#x016B;", "ū"),
    ("&#x012B;", "ī"),
    ("&#xF145;", "m"), // error in the transcription
    ("&#x0113;", "ē"),
    ("&#x0304;", "-"), // replacing combining macron
    ("&#xF147;", "[p]"), // error in the transcription, Z_28_055_5
];

/// The entity-escape catalogue, built once at startup and validated for
/// internal consistency before the pipeline runs.
#[derive(Debug, Clone)]
pub struct EscapeCatalogue {
    replaces: Vec<(String, String)>,
}

impl EscapeCatalogue {
    /// Builds the default catalogue, checking that no sequence is declared
    /// twice.
    pub fn validated() -> Result<EscapeCatalogue, CollationErrors> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for (seq, _) in ESCAPES.iter() {
            if !seen.insert(seq) {
                return Err(CollationErrors::DuplicateEscape {
                    sequence: seq.to_string(),
                });
            }
        }
        Ok(EscapeCatalogue {
            replaces: ESCAPES
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        })
    }

    /// Normalizes a raw reading token into a state label: spaces become
    /// explicit separators, asterisk markers become editorial brackets, and
    /// every catalogued escape is replaced. Idempotent on its own output.
    pub fn fix_label(&self, raw: &str) -> Result<String, CollationErrors> {
        let mut label = raw.replace(' ', "_").replace("**", "]").replace('*', "[");
        for (seq, repl) in self.replaces.iter() {
            label = label.replace(seq.as_str(), repl.as_str());
        }
        if let Some(sequence) = find_entity(&label) {
            return Err(CollationErrors::UnknownEscape {
                sequence,
                token: raw.to_string(),
            });
        }
        Ok(label)
    }

    /// Maps a raw reading token to a state. The two structural sentinels
    /// are detected before general normalization.
    pub fn normalize(&self, raw: &str) -> Result<State, CollationErrors> {
        match raw.trim() {
            OMISSION_MARKER => Ok(State::Omission),
            LACUNA_MARKER => Ok(State::Lacuna),
            _ => Ok(State::Reading(self.fix_label(raw)?)),
        }
    }
}

// Looks for a leftover `&...;` entity sequence.
fn find_entity(label: &str) -> Option<String> {
    for (idx, c) in label.char_indices() {
        if c == '&' {
            if let Some(end) = label[idx..].find(';') {
                return Some(label[idx..idx + end + 1].to_string());
            }
        }
    }
    None
}

// **** Reading table ****

/// The states of one character with the witnesses attesting each of them.
///
/// Invariant: `by_witness` and `states` describe the same assignment; a
/// witness appears in at most one state.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct CharacterStates {
    states: BTreeMap<State, BTreeSet<Witness>>,
    by_witness: BTreeMap<Witness, State>,
}

impl CharacterStates {
    fn register(
        &mut self,
        character: CharId,
        witness: Witness,
        state: State,
        diags: &mut Diagnostics,
    ) {
        if let Some(prev) = self.by_witness.get(&witness) {
            if *prev != state {
                diags.push(Diagnostic::AmbiguousReading {
                    witness,
                    character,
                    kept: prev.clone(),
                    discarded: state,
                });
            }
            return;
        }
        self.states
            .entry(state.clone())
            .or_default()
            .insert(witness.clone());
        self.by_witness.insert(witness, state);
    }

    pub fn states(&self) -> &BTreeMap<State, BTreeSet<Witness>> {
        &self.states
    }

    pub fn state_of(&self, witness: &Witness) -> Option<&State> {
        self.by_witness.get(witness)
    }
}

/// The sparse table built from the transcriptions: for every character, the
/// set of witnesses attesting each state. Built once per run; the resolver
/// only adds entries for absent witnesses, never overwrites an attested
/// reading.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ReadingTable {
    chars: BTreeMap<CharId, CharacterStates>,
}

impl ReadingTable {
    pub fn characters(&self) -> impl Iterator<Item = (&CharId, &CharacterStates)> {
        self.chars.iter()
    }

    pub fn num_characters(&self) -> usize {
        self.chars.len()
    }
}

/// Builds the reading table and the witness set out of the verse records.
///
/// Every raw reading is normalized and every witness in its list is
/// registered under the normalized state. A witness claimed by two states
/// for one character is a data defect surfaced as a diagnostic, not a
/// crash. The editorial composite witness is synthesized per character
/// after all raw witnesses are registered.
pub fn load_records(
    records: &[VerseRecord],
    catalogue: &EscapeCatalogue,
    options: &CollationOptions,
    diags: &mut Diagnostics,
) -> Result<(ReadingTable, BTreeSet<Witness>), CollationErrors> {
    let mut table = ReadingTable::default();
    let mut witnesses: BTreeSet<Witness> = BTreeSet::new();

    // The composite witness is not in the raw data.
    if let Some(comp) = &options.composite_witness {
        witnesses.insert(Witness::parse(comp));
    }

    for record in records.iter() {
        for (word_idx, word) in record.words.iter().enumerate() {
            let character = CharId {
                division: record.division,
                canto: record.canto,
                verse: record.verse,
                word: word_idx as u32,
            };
            let entry = table.chars.entry(character).or_default();

            for (raw, attesting) in word.iter() {
                let state = catalogue.normalize(raw)?;
                for w in attesting.iter() {
                    let witness = Witness::parse(w);
                    witnesses.insert(witness.clone());
                    entry.register(character, witness, state.clone(), diags);
                }
            }

            if let Some(comp) = &options.composite_witness {
                synthesize_composite(entry, character, comp, catalogue, options, diags)?;
            }
        }
    }

    debug!(
        "load_records: {} characters, {} witnesses",
        table.chars.len(),
        witnesses.len()
    );
    Ok((table, witnesses))
}

// Registers the composite witness for one character: the declared override
// reading when the exception table has one, the base-text reading
// otherwise. When the base-text witness itself has no reading, the entry is
// left absent and the resolver takes over.
fn synthesize_composite(
    entry: &mut CharacterStates,
    character: CharId,
    composite: &str,
    catalogue: &EscapeCatalogue,
    options: &CollationOptions,
    diags: &mut Diagnostics,
) -> Result<(), CollationErrors> {
    let witness = Witness::parse(composite);
    let state = match options.overrides.get(&character.to_string()) {
        Some(raw) => Some(catalogue.normalize(raw)?),
        None => {
            let base = Witness::parse(&options.base_witness);
            entry.state_of(&base).cloned()
        }
    };
    if let Some(s) = state {
        entry.register(character, witness, s, diags);
    }
    Ok(())
}

// **** Resolver ****

/// Imputes a reading for every witness absent from a character, walking the
/// fallback chain derived from the witness identifier. The chain only
/// consults the originally-attested snapshot, never other imputed entries,
/// so the result does not depend on evaluation order. Unresolvable entries
/// are left absent and recorded as missing-data diagnostics; they surface
/// as `?` in the matrix.
pub fn resolve_missing(
    table: &mut ReadingTable,
    witnesses: &BTreeSet<Witness>,
    diags: &mut Diagnostics,
) {
    for (character, entry) in table.chars.iter_mut() {
        let attested: BTreeMap<Witness, State> = entry.by_witness.clone();
        for witness in witnesses.iter() {
            if attested.contains_key(witness) {
                continue;
            }
            let imputed = witness
                .fallback_chain()
                .into_iter()
                .find_map(|fb| attested.get(&fb).cloned());
            match imputed {
                Some(state) => {
                    entry
                        .states
                        .entry(state.clone())
                        .or_default()
                        .insert(witness.clone());
                    entry.by_witness.insert(witness.clone(), state);
                }
                None => {
                    diags.push(Diagnostic::MissingData {
                        witness: witness.clone(),
                        character: *character,
                    });
                }
            }
        }
    }
}

// **** Assembler / writer ****

/// One retained character column: its label and the ordered human-readable
/// descriptions of its non-reserved states. The position of a description
/// is the symbol assigned to that state.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CharColumn {
    pub id: CharId,
    pub state_labels: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct MatrixStats {
    /// All characters considered (including dropped ones).
    pub characters: usize,
    /// Characters emitted in the matrix.
    pub retained: usize,
    /// Characters with a single surviving state.
    pub invariant: usize,
    /// Characters dropped because exclusion left them with no states.
    pub dropped_empty: usize,
}

/// The assembled witness x character matrix, write-once.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct NexusMatrix {
    /// Taxon names in canonical order.
    pub taxa: Vec<String>,
    /// Retained characters in canonical order.
    pub columns: Vec<CharColumn>,
    /// One symbol string per taxon, aligned with `taxa` and `columns`.
    pub rows: Vec<String>,
    /// Size of the symbol alphabet: 1 + the maximum number of non-reserved
    /// states over all retained characters.
    pub n_symbols: usize,
    pub stats: MatrixStats,
}

/// Assembles the final matrix: applies the descripti exclusion, drops
/// empty and (optionally) invariant characters, orders witnesses and
/// characters canonically and assigns the per-character symbols.
///
/// `division`, when set, restricts the output to the characters of one
/// major division of the work.
pub fn assemble(
    table: &ReadingTable,
    witnesses: &BTreeSet<Witness>,
    options: &CollationOptions,
    division: Option<Division>,
    diags: &mut Diagnostics,
) -> Result<NexusMatrix, CollationErrors> {
    if table.chars.is_empty() {
        return Err(CollationErrors::EmptyInput);
    }

    let excluded: BTreeSet<Witness> = options
        .descripti
        .iter()
        .map(|w| Witness::parse(w))
        .collect();
    // BTreeSet iteration is already the canonical taxon order.
    let kept: Vec<&Witness> = witnesses.iter().filter(|w| !excluded.contains(w)).collect();

    struct Retained<'a> {
        column: CharColumn,
        entry: &'a CharacterStates,
    }

    let mut stats = MatrixStats::default();
    let mut retained: Vec<Retained> = Vec::new();
    let mut max_states = 0usize;

    for (character, entry) in table.chars.iter() {
        if let Some(d) = division {
            if character.division != d {
                continue;
            }
        }
        stats.characters += 1;

        // Surviving states after exclusion.
        let mut surviving: Vec<(&State, usize)> = Vec::new();
        for (state, attesting) in entry.states.iter() {
            let count = attesting.iter().filter(|w| !excluded.contains(w)).count();
            if count > 0 {
                surviving.push((state, count));
            }
        }
        if surviving.is_empty() {
            diags.push(Diagnostic::EmptyCharacter {
                character: *character,
            });
            stats.dropped_empty += 1;
            continue;
        }
        if surviving.len() == 1 {
            // No discriminating signal: counted, optionally not emitted.
            stats.invariant += 1;
            if options.drop_invariant {
                continue;
            }
        }

        // Non-reserved states in sorted label order; the position is the
        // symbol.
        let state_labels: Vec<String> = surviving
            .iter()
            .filter_map(|(s, _)| match s {
                State::Reading(label) => Some(label.clone()),
                _ => None,
            })
            .collect();
        if state_labels.len() > max_states {
            max_states = state_labels.len();
        }

        stats.retained += 1;
        retained.push(Retained {
            column: CharColumn {
                id: *character,
                state_labels,
            },
            entry,
        });
    }

    let mut taxa: Vec<String> = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    for witness in kept.iter() {
        let mut row = String::new();
        let mut resolved = 0usize;
        for r in retained.iter() {
            match r.entry.state_of(witness) {
                Some(State::Omission) => {
                    resolved += 1;
                    row.push('-');
                }
                Some(State::Lacuna) => {
                    resolved += 1;
                    row.push('?');
                }
                Some(State::Reading(label)) => {
                    resolved += 1;
                    // The label is always present: the witness itself
                    // survived the exclusion for this state.
                    let symbol = r
                        .column
                        .state_labels
                        .iter()
                        .position(|l| l == label)
                        .unwrap_or(0);
                    row.push_str(&symbol.to_string());
                }
                None => row.push('?'),
            }
        }
        if resolved == 0 && !retained.is_empty() {
            return Err(CollationErrors::EmptyWitnessRow {
                witness: witness.id(),
            });
        }
        taxa.push(witness.taxon());
        rows.push(row);
    }

    info!(
        "assemble: {} taxa, {} characters retained ({} invariant, {} dropped)",
        taxa.len(),
        stats.retained,
        stats.invariant,
        stats.dropped_empty
    );

    Ok(NexusMatrix {
        taxa,
        columns: retained.into_iter().map(|r| r.column).collect(),
        rows,
        n_symbols: max_states + 1,
        stats,
    })
}

/// Serializes the matrix in the fixed NEXUS subset understood by the
/// downstream tools: a TAXA block, a CHARACTERS block with the state-label
/// declarations and the symbol matrix, and an optional trailing verbatim
/// block (e.g. a precomputed tree description) passed through unmodified.
///
/// The output is bit-reproducible for the same matrix and extra block.
pub fn render_nexus(matrix: &NexusMatrix, extra: Option<&str>) -> String {
    let mut out = String::new();

    out.push_str("#NEXUS\n\n");

    out.push_str("BEGIN TAXA;\n");
    out.push_str(&format!("\tDIMENSIONS NTAX={};\n", matrix.taxa.len()));
    out.push_str("\tTAXLABELS\n");
    out.push_str(&format!("\t\t{}\n", matrix.taxa.join(" ")));
    out.push_str("\t;\n");
    out.push_str("END;\n\n");

    let symbols: Vec<String> = (0..matrix.n_symbols).map(|v| v.to_string()).collect();

    out.push_str("BEGIN CHARACTERS;\n");
    out.push_str(&format!("\tDIMENSIONS  NCHAR={};\n", matrix.columns.len()));
    out.push_str(&format!(
        "\tFORMAT DATATYPE=STANDARD GAP=- MISSING=? SYMBOLS=\"{}\";\n",
        symbols.join(" ")
    ));

    out.push_str("\tCHARSTATELABELS\n");
    for (idx, column) in matrix.columns.iter().enumerate() {
        out.push_str(&format!(
            "\t\t{} {} / {} ,\n",
            idx + 1,
            column.id,
            column.state_labels.join(" ")
        ));
    }
    out.push_str("\t;\n");

    out.push_str("\tMATRIX\n");
    for (taxon, row) in matrix.taxa.iter().zip(matrix.rows.iter()) {
        out.push_str(&format!("\t{}  {}\n", taxon, row));
    }
    out.push_str(";\nEND;\n\n");

    if let Some(block) = extra {
        out.push('\n');
        out.push_str(block);
        out.push('\n');
    }

    out
}

/// Runs the full pipeline on a set of verse records: load, resolve,
/// assemble. Convenience entry point for callers that only need one
/// variant.
pub fn build_matrix(
    records: &[VerseRecord],
    options: &CollationOptions,
    division: Option<Division>,
    diags: &mut Diagnostics,
) -> Result<NexusMatrix, CollationErrors> {
    let catalogue = EscapeCatalogue::validated()?;
    let (mut table, witnesses) = load_records(records, &catalogue, options, diags)?;
    resolve_missing(&mut table, &witnesses, diags);
    assemble(&table, &witnesses, options, division, diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> EscapeCatalogue {
        EscapeCatalogue::validated().unwrap()
    }

    fn record(
        division: Division,
        canto: u32,
        verse: u32,
        words: &[&[(&str, &[&str])]],
    ) -> VerseRecord {
        VerseRecord {
            division,
            canto,
            verse,
            words: words
                .iter()
                .map(|word| {
                    word.iter()
                        .map(|(reading, wits)| {
                            (
                                reading.to_string(),
                                wits.iter().map(|w| w.to_string()).collect(),
                            )
                        })
                        .collect()
                })
                .collect(),
        }
    }

    fn no_composite() -> CollationOptions {
        CollationOptions {
            composite_witness: None,
            ..CollationOptions::default()
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let cat = catalogue();
        for raw in [
            "che la",
            "*danno**",
            "eterna duro",
            "&middot;sanza&nbsp;",
            "&#xF147;ma",
            "gia_normalizzato",
        ] {
            let once = cat.fix_label(raw).unwrap();
            let twice = cat.fix_label(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn normalization_rules() {
        let cat = catalogue();
        assert_eq!(cat.fix_label("che la").unwrap(), "che_la");
        assert_eq!(cat.fix_label("*om").unwrap(), "[om");
        assert_eq!(cat.fix_label("*danno**").unwrap(), "[danno]");
        assert_eq!(cat.fix_label("pi&ugrave;").unwrap(), "più");
        assert_eq!(cat.fix_label("&#xF147;oi").unwrap(), "[p]oi");
    }

    #[test]
    fn sentinels_take_precedence() {
        let cat = catalogue();
        assert_eq!(cat.normalize("*om.**").unwrap(), State::Omission);
        assert_eq!(cat.normalize(" *om.** ").unwrap(), State::Omission);
        assert_eq!(cat.normalize("_").unwrap(), State::Lacuna);
        assert_eq!(
            cat.normalize("om.").unwrap(),
            State::Reading("om.".to_string())
        );
    }

    #[test]
    fn unknown_escape_is_fatal() {
        let cat = catalogue();
        let err = cat.fix_label("qu&eacute;sto").unwrap_err();
        assert_eq!(
            err,
            CollationErrors::UnknownEscape {
                sequence: "&eacute;".to_string(),
                token: "qu&eacute;sto".to_string(),
            }
        );
    }

    #[test]
    fn catalogue_validates() {
        assert!(EscapeCatalogue::validated().is_ok());
    }

    #[test]
    fn witness_parsing_and_ordering() {
        let w = Witness::parse("Ash-c2");
        assert_eq!(w.base, "Ash");
        assert_eq!(w.layer, Layer::Correction("c2".to_string()));
        assert_eq!(w.id(), "Ash-c2");
        assert_eq!(w.taxon(), "Ash_c2");
        assert_eq!(Witness::parse("Mart-c2-1").taxon(), "Mart_c2_1");
        assert_eq!(Witness::parse("LauSC-orig").layer, Layer::Original);

        let mut set: BTreeSet<Witness> = BTreeSet::new();
        for id in ["Urb", "Ash-c1", "Ash", "Ash-orig"] {
            set.insert(Witness::parse(id));
        }
        let taxa: Vec<String> = set.iter().map(|w| w.taxon()).collect();
        assert_eq!(taxa, vec!["Ash", "Ash_c1", "Ash_orig", "Urb"]);
    }

    #[test]
    fn char_labels_roundtrip() {
        let c = CharId {
            division: Division::Paradiso,
            canto: 1,
            verse: 48,
            word: 0,
        };
        assert_eq!(c.to_string(), "Z_01_048_0");
        assert_eq!(CharId::parse("Z_01_048_0"), Some(c));
        assert_eq!(CharId::parse("X_01_048_0"), None);
    }

    #[test]
    fn fallback_resolves_to_base() {
        // Witness A-c1 is absent from the raw data and must take A's
        // attested reading, not UNKNOWN.
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[
                &[("foo", &["A"]), ("bar", &["B"])],
                &[("baz", &["A", "B", "A-c1"])],
            ],
        )];
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &no_composite(), None, &mut diags).unwrap();

        // Second word: A-c1 attested "baz"; first word: imputed "foo".
        let a_c1 = matrix.taxa.iter().position(|t| t == "A_c1").unwrap();
        let foo_symbol = matrix.columns[0]
            .state_labels
            .iter()
            .position(|l| l == "foo")
            .unwrap();
        assert_eq!(
            matrix.rows[a_c1].chars().next().unwrap(),
            char::from_digit(foo_symbol as u32, 10).unwrap()
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn unresolved_witness_is_unknown_with_diagnostic() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[&[("foo", &["A"])], &[("bar", &["A", "B"])]],
        )];
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &no_composite(), None, &mut diags).unwrap();

        // B is not attested for the first word and has no fallback.
        let b = matrix.taxa.iter().position(|t| t == "B").unwrap();
        assert_eq!(matrix.rows[b].chars().next().unwrap(), '?');
        let (_, missing, _) = diags.counts();
        assert_eq!(missing, 1);
    }

    #[test]
    fn resolution_is_total_and_single_valued() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[
                &[("foo", &["A"]), ("bar", &["B-orig"])],
                &[("baz", &["A", "B", "B-c1"])],
            ],
        )];
        let options = no_composite();
        let catalogue = catalogue();
        let mut diags = Diagnostics::new();
        let (mut table, witnesses) =
            load_records(&records, &catalogue, &options, &mut diags).unwrap();
        resolve_missing(&mut table, &witnesses, &mut diags);

        for (_, entry) in table.characters() {
            let mut seen: BTreeSet<&Witness> = BTreeSet::new();
            for (_, attesting) in entry.states().iter() {
                for w in attesting.iter() {
                    assert!(seen.insert(w), "witness {} in two states", w);
                }
            }
            // Every witness has exactly one state here; B falls back to
            // B-orig for the first word, B-c1 to B for the second.
            for w in witnesses.iter() {
                assert!(entry.state_of(w).is_some(), "no state for {}", w);
            }
        }
    }

    #[test]
    fn ambiguous_raw_assignment_is_a_warning() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[&[("bar", &["A"]), ("foo", &["A", "B"])]],
        )];
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &no_composite(), None, &mut diags).unwrap();
        let (ambiguous, _, _) = diags.counts();
        assert_eq!(ambiguous, 1);
        // First registration wins: A stays on "bar".
        let a = matrix.taxa.iter().position(|t| t == "A").unwrap();
        assert_eq!(matrix.rows[a], "0");
    }

    #[test]
    fn composite_defaults_to_base_text() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[&[("foo", &["PET"]), ("bar", &["B"])]],
        )];
        let mut diags = Diagnostics::new();
        let matrix =
            build_matrix(&records, &CollationOptions::default(), None, &mut diags).unwrap();
        let leo = matrix.taxa.iter().position(|t| t == "LEO").unwrap();
        let pet = matrix.taxa.iter().position(|t| t == "PET").unwrap();
        assert_eq!(matrix.rows[leo], matrix.rows[pet]);
    }

    #[test]
    fn composite_honors_override() {
        let records = vec![record(
            Division::Inferno,
            1,
            117,
            &[&[("che", &["PET"]), ("che la", &["B"])]],
        )];
        let mut options = CollationOptions::default();
        options
            .overrides
            .insert("I_01_117_0".to_string(), "che la".to_string());
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &options, None, &mut diags).unwrap();
        let leo = matrix.taxa.iter().position(|t| t == "LEO").unwrap();
        let b = matrix.taxa.iter().position(|t| t == "B").unwrap();
        assert_eq!(matrix.rows[leo], matrix.rows[b]);
    }

    #[test]
    fn exclusion_drops_empty_characters() {
        // The only reading of the second word is attested solely by A-c1,
        // and no other witness can impute through it (there is no bare A):
        // excluding A-c1 leaves the character with zero states.
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[
                &[("foo", &["A-c1"]), ("bar", &["B"])],
                &[("baz", &["A-c1"])],
            ],
        )];
        let mut options = no_composite();
        options.descripti = vec!["A-c1".to_string()];
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &options, None, &mut diags).unwrap();

        assert_eq!(matrix.columns.len(), 1);
        assert_eq!(matrix.stats.dropped_empty, 1);
        assert_eq!(matrix.taxa, vec!["B".to_string()]);
        let (_, _, empty) = diags.counts();
        assert_eq!(empty, 1);
    }

    #[test]
    fn invariant_characters_are_counted_and_droppable() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[
                &[("foo", &["A", "B"])],
                &[("foo", &["A"]), ("bar", &["B"])],
            ],
        )];
        let mut diags = Diagnostics::new();
        let full = build_matrix(&records, &no_composite(), None, &mut diags).unwrap();
        assert_eq!(full.columns.len(), 2);
        assert_eq!(full.stats.invariant, 1);

        let mut options = no_composite();
        options.drop_invariant = true;
        let reduced = build_matrix(&records, &options, None, &mut diags).unwrap();
        assert_eq!(reduced.columns.len(), 1);
        assert_eq!(reduced.stats.invariant, 1);
    }

    #[test]
    fn symbol_alphabet_bound() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[
                &[("a", &["A"]), ("b", &["B"]), ("c", &["C"])],
                &[("x", &["A", "B", "C"])],
                &[("*om.**", &["A"]), ("y", &["B", "C"])],
            ],
        )];
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &no_composite(), None, &mut diags).unwrap();
        // Per character: 3, 1 and 1 non-reserved states; the omission does
        // not count towards the alphabet.
        assert_eq!(matrix.columns[0].state_labels.len(), 3);
        assert_eq!(matrix.columns[2].state_labels.len(), 1);
        assert_eq!(matrix.n_symbols, 4);
    }

    #[test]
    fn division_partition() {
        let records = vec![
            record(Division::Inferno, 1, 1, &[&[("a", &["A"]), ("b", &["B"])]]),
            record(Division::Paradiso, 1, 1, &[&[("c", &["A"]), ("d", &["B"])]]),
        ];
        let mut diags = Diagnostics::new();
        let inferno = build_matrix(
            &records,
            &no_composite(),
            Some(Division::Inferno),
            &mut diags,
        )
        .unwrap();
        assert_eq!(inferno.columns.len(), 1);
        assert_eq!(inferno.columns[0].id.division, Division::Inferno);
    }

    #[test]
    fn empty_witness_row_is_fatal() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[&[("foo", &["A"]), ("_", &["Zz"])]],
        )];
        let mut diags = Diagnostics::new();
        // Zz is attested (as a lacuna), so this run is fine.
        assert!(build_matrix(&records, &no_composite(), None, &mut diags).is_ok());

        // The composite witness defaults to the base-text witness, which is
        // absent from this data: its row resolves nowhere.
        let options = CollationOptions::default();
        let err = build_matrix(&records, &options, None, &mut diags).unwrap_err();
        assert_eq!(
            err,
            CollationErrors::EmptyWitnessRow {
                witness: "LEO".to_string()
            }
        );
    }

    #[test]
    fn rendering_is_stable_and_well_formed() {
        let records = vec![
            record(
                Division::Inferno,
                1,
                1,
                &[
                    &[("nel mezzo", &["A", "B-orig"]), ("in mezzo", &["C"])],
                    &[("del", &["A", "C"]), ("*om.**", &["B-orig"])],
                ],
            ),
            record(Division::Purgatorio, 2, 44, &[&[("parea", &["A", "C"])]]),
        ];
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &no_composite(), None, &mut diags).unwrap();
        let text = render_nexus(&matrix, None);
        let again = render_nexus(
            &build_matrix(&records, &no_composite(), None, &mut diags).unwrap(),
            None,
        );
        assert_eq!(text, again);

        let expected = "#NEXUS\n\n\
            BEGIN TAXA;\n\
            \tDIMENSIONS NTAX=3;\n\
            \tTAXLABELS\n\
            \t\tA B_orig C\n\
            \t;\n\
            END;\n\n\
            BEGIN CHARACTERS;\n\
            \tDIMENSIONS  NCHAR=3;\n\
            \tFORMAT DATATYPE=STANDARD GAP=- MISSING=? SYMBOLS=\"0 1 2\";\n\
            \tCHARSTATELABELS\n\
            \t\t1 I_01_001_0 / in_mezzo nel_mezzo ,\n\
            \t\t2 I_01_001_1 / del ,\n\
            \t\t3 P_02_044_0 / parea ,\n\
            \t;\n\
            \tMATRIX\n\
            \tA  100\n\
            \tB_orig  1-?\n\
            \tC  000\n\
            ;\nEND;\n\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn trailing_block_is_verbatim() {
        let records = vec![record(
            Division::Inferno,
            1,
            1,
            &[&[("a", &["A"]), ("b", &["B"])]],
        )];
        let mut diags = Diagnostics::new();
        let matrix = build_matrix(&records, &no_composite(), None, &mut diags).unwrap();
        let block = "BEGIN Trees;\ntree 'T'=(A,B);\nEND; [Trees]";
        let text = render_nexus(&matrix, Some(block));
        assert!(text.ends_with(&format!("\n{}\n", block)));
    }
}
