use proptest::prelude::*;
use turbo_core::{Insertion, Replacement, ResponseDocument, Suggestion, SuggestionKind};
use turbo_decoder::{DecodeOutcome, FinalVerdict, decode, finish};

fn kind_strategy() -> impl Strategy<Value = SuggestionKind> {
    prop_oneof![
        Just(SuggestionKind::Replacement),
        Just(SuggestionKind::Insertion)
    ]
}

fn document_strategy() -> impl Strategy<Value = ResponseDocument> {
    (
        "\\PC{0,40}",
        prop::collection::vec(("\\PC{0,24}", "[ -~]{0,16}", kind_strategy()), 0..4),
        prop::collection::vec(("\\PC{0,24}", "[ -~]{0,16}"), 0..3),
    )
        .prop_map(|(response, replacements, insertions)| ResponseDocument {
            response,
            replacements: replacements
                .into_iter()
                .enumerate()
                .map(|(idx, (text, description, kind))| Replacement {
                    id: format!("replacement-{idx}"),
                    text,
                    description,
                    kind,
                })
                .collect(),
            insertions: insertions
                .into_iter()
                .enumerate()
                .map(|(idx, (text, description))| Insertion {
                    id: format!("insertion-{idx}"),
                    text,
                    description,
                })
                .collect(),
            metadata: None,
        })
}

fn char_boundaries(text: &str) -> impl Iterator<Item = usize> + '_ {
    text.char_indices().map(|(idx, _)| idx)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn serialized_documents_round_trip(doc in document_strategy(), pretty in any::<bool>()) {
        let raw = if pretty {
            serde_json::to_string_pretty(&doc).expect("serialize")
        } else {
            serde_json::to_string(&doc).expect("serialize")
        };
        prop_assert_eq!(decode(&raw), DecodeOutcome::Complete(doc.clone()));
        prop_assert_eq!(finish(&raw), FinalVerdict::Completed { document: doc });
    }

    #[test]
    fn strict_prefixes_never_complete(doc in document_strategy()) {
        let raw = serde_json::to_string(&doc).expect("serialize");
        for cut in char_boundaries(&raw) {
            let outcome = decode(&raw[..cut]);
            prop_assert!(
                matches!(outcome, DecodeOutcome::Empty | DecodeOutcome::Partial(_)),
                "prefix {:?} decoded as {:?}", &raw[..cut], outcome
            );
            let completed = matches!(finish(&raw[..cut]), FinalVerdict::Completed { .. });
            prop_assert!(!completed);
        }
    }

    #[test]
    fn partial_fields_are_prefixes_of_the_final_fields(doc in document_strategy()) {
        let raw = serde_json::to_string(&doc).expect("serialize");
        let mut last_response_len = 0;
        for cut in char_boundaries(&raw) {
            let DecodeOutcome::Partial(partial) = decode(&raw[..cut]) else {
                continue;
            };
            prop_assert!(doc.response.starts_with(&partial.response));
            prop_assert!(partial.response.len() >= last_response_len);
            last_response_len = partial.response.len();
            for (idx, replacement) in partial.replacements.iter().enumerate() {
                if replacement.is_placeholder() {
                    continue;
                }
                let full = &doc.replacements[idx];
                prop_assert!(full.id.starts_with(&replacement.id));
                prop_assert!(full.text.starts_with(&replacement.text));
                prop_assert!(full.description.starts_with(&replacement.description));
            }
            for (idx, insertion) in partial.insertions.iter().enumerate() {
                if insertion.is_placeholder() {
                    continue;
                }
                prop_assert!(doc.insertions[idx].text.starts_with(&insertion.text));
            }
        }
    }

    #[test]
    fn arbitrary_input_never_panics(raw in "\\PC{0,200}") {
        let _ = decode(&raw);
        let _ = finish(&raw);
    }

    #[test]
    fn json_flavoured_noise_never_panics(raw in r#"[\{\}\[\]",:\\u0-9a-z ]{0,120}"#) {
        let _ = decode(&raw);
        let _ = finish(&raw);
    }
}
