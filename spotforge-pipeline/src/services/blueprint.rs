//! Musical blueprint builder
//!
//! Deterministic: identical inputs always yield the same plan and the same
//! composition prompt. The builder converts sentence timings plus the LLM's
//! cues into a bar-aligned composition plan: sections, sync points, the
//! text-to-music prompt, and the mixing plan the audio stage consumes.

use spotforge_common::timing::{
    self, calculate_pre_post_roll, nearest_downbeat, optimize_bpm_for_duration, snap_to_phrase,
    RollOptions, TimeSignature,
};
use spotforge_common::Result;

use crate::models::{
    AdBlueprint, AdContext, ArcSegment, DuckingPoint, EndingType, FadeSettings, MixingPlan,
    MusicSpec, MusicalBlueprint, MusicalFunction, MusicalStructure, Section, SectionDirection,
    SentenceCue, SentenceTiming, SyncPoint, SyncPointKind, VolumeSettings,
};

/// Gap between sentences that forces a section break
const SECTION_GAP: f64 = 0.4;
/// Composition prompt budget in characters
const PROMPT_BUDGET: usize = 1000;
/// BPM search range around the generator's target
const BPM_RANGE: f64 = 5.0;

/// Brand-introduction keywords, matched in the first 40% of sentences
const BRAND_KEYWORDS: &[&str] = &[
    "introducing",
    "welcome",
    "meet",
    "discover",
    "presenting",
    "announcing",
];

/// Call-to-action keywords, matched in the last 40% of sentences
const CTA_KEYWORDS: &[&str] = &[
    "try", "get", "start", "order", "call", "visit", "download", "subscribe", "shop", "join",
    "book", "sign up", "learn more",
];

/// Classification of one sentence's musical role
#[derive(Debug, Clone, PartialEq)]
struct SentenceRole {
    label: &'static str,
    energy: u8,
    direction: SectionDirection,
}

/// Build the bar-aligned composition plan for one production.
pub fn build(
    blueprint: &AdBlueprint,
    sentences: &[SentenceTiming],
    voice_duration: f64,
) -> Result<MusicalBlueprint> {
    let time_sig = TimeSignature::default();
    let music = &blueprint.music;
    let ad_duration = blueprint.context.duration_seconds;

    // Preliminary roll sizing, then refine the BPM so whole bars land as
    // close as possible to the target total.
    let roll_opts = RollOptions {
        genre: Some(music.genre.clone()),
        ad_duration: Some(ad_duration),
        time_sig: Some(time_sig),
    };
    let preliminary = calculate_pre_post_roll(voice_duration, music.target_bpm, &roll_opts);
    let desired_total =
        preliminary.pre_roll_duration + voice_duration + preliminary.post_roll_duration;
    let final_bpm =
        optimize_bpm_for_duration(music.target_bpm, desired_total, BPM_RANGE, time_sig);
    let bar = timing::bar_duration(final_bpm, time_sig);

    // Structure overrides win over the computed roll
    let refined = calculate_pre_post_roll(voice_duration, final_bpm, &roll_opts);
    let structure = music.musical_structure.clone().unwrap_or_default();
    let pre_roll_bars = structure
        .intro_bars
        .unwrap_or(refined.pre_roll_bars)
        .clamp(1, 8);
    let post_roll_bars = structure
        .outro_bars
        .unwrap_or(refined.post_roll_bars)
        .clamp(1, 8);

    let body_bars = ((voice_duration / bar).ceil() as u32).max(1);
    let total_bars = pre_roll_bars + body_bars + post_roll_bars;
    let pre_roll_duration = pre_roll_bars as f64 * bar;
    let post_roll_duration = post_roll_bars as f64 * bar;
    let total_duration = total_bars as f64 * bar;

    let phrase_len = structure.phrase_length.unwrap_or(2).clamp(2, 4);

    let sections = build_sections(
        sentences,
        &blueprint.sentence_cues,
        music,
        pre_roll_bars,
        post_roll_bars,
        total_bars,
        pre_roll_duration,
        bar,
        phrase_len,
    );

    let sync_points = detect_sync_points(sentences, pre_roll_duration, final_bpm, time_sig);

    let composition_prompt = compose_prompt(
        music,
        &structure,
        final_bpm,
        time_sig,
        total_bars,
        total_duration,
        &sections,
    );

    let duck_base = blueprint.volume.ducking;
    let ducking_points = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let multiplier = blueprint
                .sentence_cues
                .get(i)
                .map(|c| c.music_volume)
                .unwrap_or(1.0)
                .clamp(0.1, 3.0);
            DuckingPoint {
                start: pre_roll_duration + s.start,
                end: pre_roll_duration + s.end,
                level: (duck_base * multiplier).clamp(0.05, 1.0),
            }
        })
        .collect();

    let plan = MusicalBlueprint {
        final_bpm,
        time_signature: time_sig,
        bar_duration: bar,
        total_bars,
        pre_roll_bars,
        pre_roll_duration,
        post_roll_bars,
        post_roll_duration,
        voice_entry_point: pre_roll_duration,
        sections,
        sync_points,
        composition_prompt,
        mixing_plan: MixingPlan {
            voice_delay_seconds: pre_roll_duration,
            music_trim_duration: total_duration,
            ducking_points,
        },
    };
    plan.validate()?;
    Ok(plan)
}

/// Group classified sentences into phrase-snapped sections with an intro
/// prepended and an outro appended.
#[allow(clippy::too_many_arguments)]
fn build_sections(
    sentences: &[SentenceTiming],
    cues: &[SentenceCue],
    music: &MusicSpec,
    pre_roll_bars: u32,
    post_roll_bars: u32,
    total_bars: u32,
    pre_roll_duration: f64,
    bar: f64,
    phrase_len: u32,
) -> Vec<Section> {
    let body_first = pre_roll_bars + 1;
    let body_last = total_bars - post_roll_bars;
    let instrumentation = instrumentation_summary(music);

    let mut sections = Vec::new();
    sections.push(Section {
        name: "Intro".to_string(),
        start_bar: 1,
        end_bar: pre_roll_bars,
        start_time: 0.0,
        end_time: pre_roll_duration,
        energy: 3,
        direction: SectionDirection::Building,
        instrumentation_notes: format!("low energy, establish the groove ({})", instrumentation),
        voice_sentences: Vec::new(),
    });

    // Group consecutive sentences sharing a label with no significant gap.
    // The pause flag marks groups separated by a real gap in the voice, the
    // only place the section layout may leave uncovered bars.
    let mut groups: Vec<(SentenceRole, Vec<usize>, bool)> = Vec::new();
    for (i, sentence) in sentences.iter().enumerate() {
        let role = classify_sentence(i, sentences.len(), cues.get(i));
        let pause = match groups.last() {
            Some((_, indices, _)) => {
                let prev = &sentences[*indices.last().expect("group is non-empty")];
                sentence.start - prev.end >= SECTION_GAP
            }
            None => false,
        };
        let breaks = match groups.last() {
            Some((last_role, _, _)) => last_role.label != role.label || pause,
            None => true,
        };
        if breaks {
            groups.push((role, vec![i], pause));
        } else {
            groups.last_mut().expect("group exists").1.push(i);
        }
    }

    let group_count = groups.len();
    let mut prev_end = pre_roll_bars;
    for (gi, (role, indices, pause_before)) in groups.into_iter().enumerate() {
        if prev_end >= body_last {
            break;
        }
        let first = &sentences[indices[0]];
        let last = &sentences[*indices.last().expect("group is non-empty")];
        let raw_start = ((pre_roll_duration + first.start) / bar).floor() as u32 + 1;
        let raw_end = (((pre_roll_duration + last.end) / bar).ceil() as u32).max(raw_start);

        // Sections run back to back; a detected pause may push the start to
        // its phrase-snapped bar and leave a gap behind it
        let mut start_bar = prev_end + 1;
        if pause_before {
            let snapped = snap_boundary(raw_start.saturating_sub(1), phrase_len) + 1;
            start_bar = start_bar.max(snapped);
        }
        start_bar = start_bar.clamp(body_first, body_last);

        // The final group always closes out the body; earlier boundaries
        // snap to phrase multiples
        let end_bar = if gi + 1 == group_count {
            body_last
        } else {
            snap_boundary(raw_end, phrase_len).clamp(start_bar, body_last)
        };

        sections.push(Section {
            name: role.label.to_string(),
            start_bar,
            end_bar,
            start_time: (start_bar - 1) as f64 * bar,
            end_time: end_bar as f64 * bar,
            energy: role.energy,
            direction: role.direction,
            instrumentation_notes: section_notes(role.label, &instrumentation),
            voice_sentences: indices,
        });
        prev_end = end_bar;
    }

    sections.push(Section {
        name: "Outro".to_string(),
        start_bar: body_last + 1,
        end_bar: total_bars,
        start_time: body_last as f64 * bar,
        end_time: total_bars as f64 * bar,
        energy: 4,
        direction: SectionDirection::Resolving,
        instrumentation_notes: "clean button ending".to_string(),
        voice_sentences: Vec::new(),
    });
    sections
}

/// Snap a boundary bar count to the nearest phrase multiple (may be zero).
fn snap_boundary(bars: u32, phrase_len: u32) -> u32 {
    if bars == 0 {
        return 0;
    }
    snap_to_phrase(bars, phrase_len)
}

/// Classify a sentence's musical role.
///
/// Priority: explicit cue function, then cue-text heuristics, then the
/// positional fallback by fraction through the script.
fn classify_sentence(index: usize, count: usize, cue: Option<&SentenceCue>) -> SentenceRole {
    if let Some(function) = cue.and_then(|c| c.function) {
        return role_for_function(function);
    }

    if let Some(text) = cue.and_then(|c| c.cue.as_deref()) {
        let text = text.to_lowercase();
        if text.contains("hook") {
            return role_for_function(MusicalFunction::Hook);
        }
        if text.contains("build") {
            return role_for_function(MusicalFunction::Build);
        }
        if text.contains("peak") || text.contains("climax") {
            return role_for_function(MusicalFunction::Peak);
        }
        if text.contains("resolve") || text.contains("resolution") {
            return role_for_function(MusicalFunction::Resolve);
        }
        if text.contains("warm") {
            return SentenceRole {
                label: "Warm",
                energy: 5,
                direction: SectionDirection::Sustaining,
            };
        }
        if text.contains("cta") || text.contains("call to action") {
            return SentenceRole {
                label: "CTA",
                energy: 7,
                direction: SectionDirection::Building,
            };
        }
    }

    // Positional fallback by fraction through the script
    let fraction = if count > 1 {
        index as f64 / (count - 1) as f64
    } else {
        0.0
    };
    if fraction < 0.15 {
        SentenceRole {
            label: "Opening",
            energy: 5,
            direction: SectionDirection::Building,
        }
    } else if fraction < 0.45 {
        SentenceRole {
            label: "Body",
            energy: 6,
            direction: SectionDirection::Sustaining,
        }
    } else if fraction < 0.7 {
        SentenceRole {
            label: "Peak",
            energy: 8,
            direction: SectionDirection::Peak,
        }
    } else if fraction < 0.85 {
        SentenceRole {
            label: "Resolution",
            energy: 5,
            direction: SectionDirection::Resolving,
        }
    } else {
        SentenceRole {
            label: "CTA",
            energy: 7,
            direction: SectionDirection::Building,
        }
    }
}

fn role_for_function(function: MusicalFunction) -> SentenceRole {
    match function {
        MusicalFunction::Hook => SentenceRole {
            label: "Hook",
            energy: 7,
            direction: SectionDirection::Building,
        },
        MusicalFunction::Build => SentenceRole {
            label: "Build",
            energy: 6,
            direction: SectionDirection::Building,
        },
        MusicalFunction::Peak => SentenceRole {
            label: "Peak",
            energy: 9,
            direction: SectionDirection::Peak,
        },
        MusicalFunction::Resolve => SentenceRole {
            label: "Resolution",
            energy: 4,
            direction: SectionDirection::Resolving,
        },
        MusicalFunction::Transition => SentenceRole {
            label: "Transition",
            energy: 5,
            direction: SectionDirection::Sustaining,
        },
        MusicalFunction::Pause => SentenceRole {
            label: "Pause",
            energy: 3,
            direction: SectionDirection::Sustaining,
        },
    }
}

/// Landmark sentences become sync points snapped onto the grid.
fn detect_sync_points(
    sentences: &[SentenceTiming],
    pre_roll_duration: f64,
    bpm: f64,
    time_sig: TimeSignature,
) -> Vec<SyncPoint> {
    let count = sentences.len();
    let mut points = Vec::new();

    for (i, sentence) in sentences.iter().enumerate() {
        let text = sentence.text.to_lowercase();
        let fraction = i as f64 / count.max(1) as f64;

        if fraction < 0.4 && BRAND_KEYWORDS.iter().any(|k| text.contains(k)) {
            points.push(sync_point(
                SyncPointKind::BrandMention,
                sentence.start,
                pre_roll_duration,
                bpm,
                time_sig,
                "accent hit under the brand name",
            ));
        }
        if fraction >= 0.6 && CTA_KEYWORDS.iter().any(|k| text.contains(k)) {
            points.push(sync_point(
                SyncPointKind::CallToAction,
                sentence.start,
                pre_roll_duration,
                bpm,
                time_sig,
                "pull instrumentation back for the call to action",
            ));
        }
    }

    if let Some(last) = sentences.last() {
        points.push(sync_point(
            SyncPointKind::FinalWord,
            last.end,
            pre_roll_duration,
            bpm,
            time_sig,
            "button ending after the final word",
        ));
    }

    points.sort_by(|a, b| {
        a.voice_timestamp
            .partial_cmp(&b.voice_timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    points
}

fn sync_point(
    kind: SyncPointKind,
    voice_timestamp: f64,
    pre_roll_duration: f64,
    bpm: f64,
    time_sig: TimeSignature,
    action: &str,
) -> SyncPoint {
    let music_time = pre_roll_duration + voice_timestamp;
    let downbeat = nearest_downbeat(music_time, bpm, time_sig);
    SyncPoint {
        kind,
        voice_timestamp,
        nearest_downbeat: downbeat.time,
        bar: downbeat.bar,
        beat: 1,
        offset: downbeat.offset,
        music_action: action.to_string(),
    }
}

fn instrumentation_summary(music: &MusicSpec) -> String {
    if music.instrumentation.is_empty() {
        "full arrangement".to_string()
    } else {
        music.instrumentation.join(", ")
    }
}

fn section_notes(label: &str, instrumentation: &str) -> String {
    match label {
        "Peak" => format!("full arrangement peak ({})", instrumentation),
        "CTA" => "pull back, leave space under the call to action".to_string(),
        "Pause" => "sparse, almost silent".to_string(),
        _ => instrumentation.to_string(),
    }
}

/// Assemble the text-to-music prompt within the 1000-character budget.
///
/// When the full prompt runs long, section lines are dropped from the end;
/// the ending directive and the continuity line always survive.
fn compose_prompt(
    music: &MusicSpec,
    structure: &MusicalStructure,
    bpm: f64,
    time_sig: TimeSignature,
    total_bars: u32,
    total_duration: f64,
    sections: &[Section],
) -> String {
    let key = structure
        .key
        .clone()
        .or_else(|| music.key.clone())
        .map(|k| format!(", key of {}", k))
        .unwrap_or_default();

    let header = format!(
        "{:.0} BPM, {} time, {} mood{}. {} bars, {:.1} seconds total. {}. \
         Instrumental only, no vocals. Instrumentation: {}; leave 1-4 kHz clear for voice.",
        bpm,
        time_sig,
        music.mood,
        key,
        total_bars,
        total_duration,
        music.genre,
        instrumentation_summary(music),
    );

    let section_lines: Vec<String> = sections
        .iter()
        .map(|s| {
            format!(
                "Bars {}-{}: {}. {}/10 energy, {}. {}",
                s.start_bar,
                s.end_bar,
                s.name,
                s.energy,
                direction_word(s.direction),
                s.instrumentation_notes,
            )
        })
        .collect();

    let composer_notes = music
        .composer_direction
        .as_deref()
        .map(|d| format!("Composer notes: {}.", d.trim_end_matches('.')))
        .unwrap_or_default();

    let ending = match structure.ending_type {
        EndingType::Button => "End with a clean button ending on the final downbeat.",
        EndingType::Sustain => "End on a sustained final chord.",
        EndingType::Stinger => "End with a short stinger accent after the final bar.",
        EndingType::Decay => "Let the final chord decay naturally.",
    };
    let tail = format!(
        "{} Continuous flowing music. Smooth transitions between sections.",
        ending
    );

    // Keep header and tail; drop section lines from the end until it fits.
    let mut kept = section_lines.len();
    loop {
        let mut parts = vec![header.clone()];
        parts.extend(section_lines[..kept].iter().cloned());
        if !composer_notes.is_empty() && kept == section_lines.len() {
            parts.push(composer_notes.clone());
        }
        parts.push(tail.clone());
        let prompt = parts.join(" ");
        if prompt.chars().count() <= PROMPT_BUDGET || kept == 0 {
            return truncate_chars(&prompt, PROMPT_BUDGET);
        }
        kept -= 1;
    }
}

fn direction_word(direction: SectionDirection) -> &'static str {
    match direction {
        SectionDirection::Building => "building",
        SectionDirection::Sustaining => "sustaining",
        SectionDirection::Resolving => "resolving",
        SectionDirection::Peak => "peak",
    }
}

fn truncate_chars(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        s.to_string()
    } else {
        s.chars().take(budget).collect()
    }
}

/// Deterministic fallback plan used when the blueprint generator fails with
/// a non-retryable error: a sensible default arc derived from the prompt.
pub fn fallback_blueprint(prompt: &str, duration_seconds: f64, tone: &str) -> AdBlueprint {
    let subject = prompt.trim().trim_end_matches('.');
    let script = format!(
        "{}. Made for people who expect more. This is the moment everything changes. Try it today.",
        subject
    );
    let arc = [
        ("hook", 0.00, 0.25, 6u8, "establish an inviting hook"),
        ("build", 0.25, 0.55, 7, "layer momentum under the message"),
        ("peak", 0.55, 0.80, 9, "full energy at the emotional peak"),
        ("cta", 0.80, 1.00, 7, "confident close under the call to action"),
    ]
    .into_iter()
    .map(|(label, from, to, energy, fragment)| ArcSegment {
        label: label.to_string(),
        start: from * duration_seconds,
        end: to * duration_seconds,
        energy,
        prompt: fragment.to_string(),
    })
    .collect();

    AdBlueprint {
        script,
        context: AdContext {
            duration_seconds,
            ad_category: "general".to_string(),
        },
        music: MusicSpec {
            target_bpm: 100.0,
            genre: "modern corporate".to_string(),
            mood: if tone.trim().is_empty() {
                "confident".to_string()
            } else {
                tone.trim().to_string()
            },
            key: None,
            arc,
            button_ending: true,
            musical_structure: Some(MusicalStructure {
                intro_bars: Some(2),
                outro_bars: Some(1),
                ..Default::default()
            }),
            instrumentation: vec!["piano".to_string(), "soft synth".to_string(), "light percussion".to_string()],
            composer_direction: None,
        },
        sentence_cues: Vec::new(),
        fades: FadeSettings::default(),
        volume: VolumeSettings::default(),
        tone: Some(tone.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdContext, FadeSettings, VolumeSettings};

    fn test_blueprint(duration: f64, bpm: f64) -> AdBlueprint {
        AdBlueprint {
            script: String::new(),
            context: AdContext {
                duration_seconds: duration,
                ad_category: "beverage".to_string(),
            },
            music: MusicSpec {
                target_bpm: bpm,
                genre: "modern corporate".to_string(),
                mood: "warm".to_string(),
                key: None,
                arc: vec![],
                button_ending: true,
                musical_structure: None,
                instrumentation: vec!["piano".to_string(), "strings".to_string()],
                composer_direction: None,
            },
            sentence_cues: vec![],
            fades: FadeSettings::default(),
            volume: VolumeSettings::default(),
            tone: None,
        }
    }

    fn sentences(spans: &[(&str, f64, f64)]) -> Vec<SentenceTiming> {
        spans
            .iter()
            .map(|(text, start, end)| SentenceTiming {
                text: text.to_string(),
                start: *start,
                end: *end,
            })
            .collect()
    }

    #[test]
    fn thirty_second_ad_at_100_bpm() {
        let bp = test_blueprint(30.0, 100.0);
        let voice = sentences(&[
            ("Introducing Solstice Coffee.", 0.0, 3.0),
            ("Slow roasted for a smoother morning.", 3.2, 8.5),
            ("One cup and you will taste the difference.", 8.7, 14.8),
            ("Rich, never bitter.", 15.0, 18.0),
            ("Try Solstice today.", 18.4, 24.0),
        ]);
        let plan = build(&bp, &voice, 24.0).unwrap();

        assert!((plan.bar_duration - 2.4).abs() < 1e-9);
        assert_eq!(plan.total_bars, 13);
        assert_eq!(plan.pre_roll_bars, 2);
        assert_eq!(plan.post_roll_bars, 1);
        assert!((plan.voice_entry_point - 4.8).abs() < 1e-9);
        assert!(
            (plan.total_duration() - plan.total_bars as f64 * plan.bar_duration).abs() < 1e-9
        );
        plan.validate().unwrap();
    }

    #[test]
    fn single_sentence_yields_intro_body_outro() {
        let bp = test_blueprint(15.0, 120.0);
        let voice = sentences(&[("Try Solstice Coffee today.", 0.0, 8.0)]);
        let plan = build(&bp, &voice, 8.0).unwrap();
        assert_eq!(plan.sections.len(), 3);
        assert_eq!(plan.sections[0].name, "Intro");
        assert_eq!(plan.sections[2].name, "Outro");
    }

    #[test]
    fn five_second_ad_keeps_minimum_rolls() {
        let bp = test_blueprint(5.0, 120.0);
        let voice = sentences(&[("Solstice.", 0.0, 1.5)]);
        let plan = build(&bp, &voice, 1.5).unwrap();
        assert!(plan.pre_roll_bars >= 1);
        assert!(plan.post_roll_bars >= 1);
        plan.validate().unwrap();
    }

    #[test]
    fn sections_cover_grid_without_overlap() {
        let bp = test_blueprint(30.0, 104.0);
        let voice = sentences(&[
            ("Wake up to something better.", 0.0, 3.5),
            ("Crafted in small batches.", 4.5, 8.0),
            ("Visit solstice.coffee and order yours.", 8.2, 14.0),
        ]);
        let plan = build(&bp, &voice, 14.0).unwrap();
        for pair in plan.sections.windows(2) {
            assert!(pair[1].start_bar > pair[0].end_bar);
        }
        assert_eq!(plan.sections.first().unwrap().start_bar, 1);
        assert_eq!(plan.sections.last().unwrap().end_bar, plan.total_bars);
    }

    #[test]
    fn explicit_cue_beats_heuristics_and_position() {
        let role = classify_sentence(
            0,
            5,
            Some(&SentenceCue {
                music_volume: 1.0,
                function: Some(MusicalFunction::Peak),
                cue: Some("gentle warm opening".to_string()),
            }),
        );
        assert_eq!(role.label, "Peak");
        assert_eq!(role.direction, SectionDirection::Peak);
    }

    #[test]
    fn cue_text_heuristics_apply_without_function() {
        let role = classify_sentence(
            2,
            5,
            Some(&SentenceCue {
                music_volume: 1.0,
                function: None,
                cue: Some("big build into the chorus".to_string()),
            }),
        );
        assert_eq!(role.label, "Build");
    }

    #[test]
    fn positional_fallback_covers_the_script() {
        assert_eq!(classify_sentence(0, 10, None).label, "Opening");
        assert_eq!(classify_sentence(3, 10, None).label, "Body");
        assert_eq!(classify_sentence(5, 10, None).label, "Peak");
        assert_eq!(classify_sentence(7, 10, None).label, "Resolution");
        assert_eq!(classify_sentence(9, 10, None).label, "CTA");
    }

    #[test]
    fn landmarks_emit_sorted_sync_points() {
        let bp = test_blueprint(30.0, 100.0);
        let voice = sentences(&[
            ("Introducing Solstice Coffee.", 0.0, 3.0),
            ("Roasted slowly, served bright.", 3.5, 9.0),
            ("The best part of waking up.", 9.5, 15.0),
            ("Visit solstice.coffee and order today.", 16.0, 22.0),
        ]);
        let plan = build(&bp, &voice, 22.0).unwrap();

        let kinds: Vec<SyncPointKind> = plan.sync_points.iter().map(|p| p.kind).collect();
        assert!(kinds.contains(&SyncPointKind::BrandMention));
        assert!(kinds.contains(&SyncPointKind::CallToAction));
        assert!(kinds.contains(&SyncPointKind::FinalWord));
        for pair in plan.sync_points.windows(2) {
            assert!(pair[0].voice_timestamp <= pair[1].voice_timestamp);
        }
    }

    #[test]
    fn composition_prompt_is_deterministic_and_bounded() {
        let bp = test_blueprint(30.0, 100.0);
        let voice = sentences(&[
            ("Introducing Solstice Coffee.", 0.0, 3.0),
            ("Try it today.", 4.0, 8.0),
        ]);
        let a = build(&bp, &voice, 8.0).unwrap();
        let b = build(&bp, &voice, 8.0).unwrap();
        assert_eq!(a.composition_prompt, b.composition_prompt);
        assert!(a.composition_prompt.chars().count() <= 1000);
        assert!(a.composition_prompt.contains("Instrumental only, no vocals"));
        assert!(a.composition_prompt.contains("leave 1-4 kHz clear for voice"));
        assert!(a
            .composition_prompt
            .ends_with("Continuous flowing music. Smooth transitions between sections."));
    }

    #[test]
    fn long_section_lists_still_fit_the_budget() {
        let bp = test_blueprint(60.0, 100.0);
        let voice: Vec<SentenceTiming> = (0..24)
            .map(|i| SentenceTiming {
                text: format!("A fairly long marketing sentence number {} goes right here.", i),
                start: i as f64 * 2.2,
                end: i as f64 * 2.2 + 2.0,
            })
            .collect();
        let plan = build(&bp, &voice, 53.0).unwrap();
        assert!(plan.composition_prompt.chars().count() <= 1000);
        assert!(plan
            .composition_prompt
            .contains("Continuous flowing music"));
    }

    #[test]
    fn structure_overrides_rolls_and_phrase_length() {
        let mut bp = test_blueprint(30.0, 100.0);
        bp.music.musical_structure = Some(MusicalStructure {
            intro_bars: Some(3),
            outro_bars: Some(2),
            phrase_length: Some(4),
            ..Default::default()
        });
        let voice = sentences(&[("Try Solstice.", 0.0, 10.0)]);
        let plan = build(&bp, &voice, 10.0).unwrap();
        assert_eq!(plan.pre_roll_bars, 3);
        assert_eq!(plan.post_roll_bars, 2);
        plan.validate().unwrap();
    }

    #[test]
    fn mixing_plan_mirrors_the_grid() {
        let bp = test_blueprint(30.0, 100.0);
        let voice = sentences(&[
            ("Wake up.", 0.0, 2.0),
            ("Drink well.", 2.5, 5.0),
        ]);
        let plan = build(&bp, &voice, 5.0).unwrap();
        assert!((plan.mixing_plan.voice_delay_seconds - plan.pre_roll_duration).abs() < 1e-9);
        assert!(
            (plan.mixing_plan.music_trim_duration - plan.total_duration()).abs() < 1e-9
        );
        assert_eq!(plan.mixing_plan.ducking_points.len(), 2);
        let first = plan.mixing_plan.ducking_points[0];
        assert!((first.start - plan.pre_roll_duration).abs() < 1e-9);
        assert!(first.level >= 0.05 && first.level <= 1.0);
    }

    #[test]
    fn fallback_blueprint_is_deterministic() {
        let a = fallback_blueprint("Promote a coffee brand", 30.0, "warm");
        let b = fallback_blueprint("Promote a coffee brand", 30.0, "warm");
        assert_eq!(a, b);
        assert_eq!(a.music.genre, "modern corporate");
        let labels: Vec<&str> = a.music.arc.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["hook", "build", "peak", "cta"]);
        let structure = a.music.musical_structure.clone().unwrap();
        assert_eq!(structure.intro_bars, Some(2));
        assert_eq!(structure.outro_bars, Some(1));
        a.validate().unwrap();
    }
}
