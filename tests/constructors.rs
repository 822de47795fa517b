//! Constructor registration and resolution tests
//!
//! Registration errors are fatal at configuration time; resolution walks
//! resolvers, the argument itself, then the default constructor.

use std::rc::Rc;

use serde_json::json;
use stepline::{
    ConfigError, ConstructorOptions, ConstructorRegistry, Pipeline, StepArgument, StepStatus,
};

#[test]
fn duplicate_constructor_names_are_rejected() {
    let result: Result<Pipeline<String>, ConfigError> = Pipeline::configure(|p| {
        p.constructor("service", ConstructorOptions::default(), |_, word: &String| {
            Ok(Some(word.clone()))
        })?;
        p.constructor("service", ConstructorOptions::default(), |_, word: &String| {
            Ok(Some(word.clone()))
        })?;
        Ok(())
    });

    assert_eq!(
        result.err(),
        Some(ConfigError::DuplicateConstructor {
            name: "service".to_string()
        })
    );
}

#[test]
fn second_default_constructor_is_rejected() {
    let result: Result<Pipeline<String>, ConfigError> = Pipeline::configure(|p| {
        p.constructor(
            "first",
            ConstructorOptions { default: true },
            |_, word: &String| Ok(Some(word.clone())),
        )?;
        p.constructor(
            "second",
            ConstructorOptions { default: true },
            |_, word: &String| Ok(Some(word.clone())),
        )?;
        Ok(())
    });

    assert_eq!(result.err(), Some(ConfigError::DuplicateDefaultConstructor));
}

#[test]
fn unresolvable_step_fails_at_registration() {
    let result: Result<Pipeline<String>, ConfigError> = Pipeline::configure(|p| {
        p.step("unknown").register()?;
        Ok(())
    });

    assert_eq!(
        result.err(),
        Some(ConfigError::UnresolvedConstructor {
            label: "unknown".to_string()
        })
    );
}

#[test]
fn missing_named_constructor_fails_at_registration() {
    let result: Result<Pipeline<String>, ConfigError> = Pipeline::configure(|p| {
        p.step("anything").constructor("missing").register()?;
        Ok(())
    });

    assert_eq!(
        result.err(),
        Some(ConfigError::UnresolvedConstructor {
            label: "missing".to_string()
        })
    );
}

#[test]
fn inline_callable_and_named_constructor_conflict() {
    let result: Result<Pipeline<String>, ConfigError> = Pipeline::configure(|p| {
        p.constructor("service", ConstructorOptions::default(), |_, word: &String| {
            Ok(Some(word.clone()))
        })?;
        p.step("work")
            .constructor("service")
            .construct_with(|_, word: &String| Ok(Some(word.clone())))
            .register()?;
        Ok(())
    });

    assert_eq!(
        result.err(),
        Some(ConfigError::AmbiguousConstructor {
            label: "work".to_string(),
            name: "service".to_string()
        })
    );
}

#[test]
fn reserved_option_keys_are_rejected() {
    let result: Result<Pipeline<String>, ConfigError> = Pipeline::configure(|p| {
        p.step_fn(|_, word: &String| Ok(Some(word.clone())))
            .option("if", true)
            .register()?;
        Ok(())
    });

    assert_eq!(
        result.err(),
        Some(ConfigError::ReservedOptionKey {
            key: "if".to_string()
        })
    );
}

#[test]
fn user_options_are_readable_from_the_constructor() {
    let mut pipeline: Pipeline<String> = Pipeline::configure(|p| {
        p.step_fn(|step, word: &String| {
            let suffix = step
                .option("suffix")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(Some(format!("{word}{suffix}")))
        })
        .option("suffix", "!")
        .register()?;
        Ok(())
    })
    .unwrap();

    assert_eq!(pipeline.execute("hanna".to_string()).unwrap(), "hanna!");
}

#[test]
fn resolvers_are_consulted_in_order_first_match_wins() {
    let mut pipeline: Pipeline<String> = Pipeline::configure(|p| {
        p.constructor("shout", ConstructorOptions::default(), |_, word: &String| {
            Ok(Some(word.to_uppercase()))
        })?;
        p.constructor("whisper", ConstructorOptions::default(), |_, word: &String| {
            Ok(Some(word.to_lowercase()))
        })?;

        p.resolver(|argument: &StepArgument<String>| {
            argument
                .as_key()
                .filter(|key| key.starts_with("loud"))
                .map(|_| "shout".to_string())
        });
        p.resolver(|argument: &StepArgument<String>| {
            argument.as_key().map(|_| "whisper".to_string())
        });

        p.step("loud_greeting").register()?;
        Ok(())
    })
    .unwrap();

    assert_eq!(pipeline.execute("hey".to_string()).unwrap(), "HEY");
    assert_eq!(pipeline.steps()[0].constructor_name(), "shout");
}

#[test]
fn default_constructor_is_the_fallback_for_unmatched_keys() {
    let mut pipeline: Pipeline<String> = Pipeline::configure(|p| {
        p.constructor(
            "echo",
            ConstructorOptions { default: true },
            |step, word: &String| Ok(Some(format!("{word}:{}", step.label()))),
        )?;
        p.step("anything").register()?;
        Ok(())
    })
    .unwrap();

    assert_eq!(
        pipeline.execute("word".to_string()).unwrap(),
        "word:anything"
    );
}

#[test]
fn shared_registry_is_consulted_after_the_local_table() {
    let mut shared: ConstructorRegistry<String> = ConstructorRegistry::new();
    shared
        .register("shared_upcase", ConstructorOptions::default(), |_, word: &String| {
            Ok(Some(word.to_uppercase()))
        })
        .unwrap();
    let shared = Rc::new(shared);

    let mut pipeline: Pipeline<String> = Pipeline::new().with_registry(Rc::clone(&shared));
    pipeline.step("shared_upcase").register().unwrap();

    assert_eq!(pipeline.execute("hanna".to_string()).unwrap(), "HANNA");

    // a second pipeline reuses the same registry instance
    let mut other: Pipeline<String> = Pipeline::new().with_registry(shared);
    other
        .step("work")
        .constructor("shared_upcase")
        .register()
        .unwrap();
    assert_eq!(other.execute("lee".to_string()).unwrap(), "LEE");
}

#[test]
fn key_steps_retain_their_raw_argument() {
    let mut pipeline: Pipeline<String> = Pipeline::configure(|p| {
        p.constructor(
            "echo",
            ConstructorOptions { default: true },
            |_, word: &String| Ok(Some(word.clone())),
        )?;
        p.step("lookup_key").label("relabelled").register()?;
        p.step_fn(|_, word: &String| Ok(Some(word.clone())))
            .register()?;
        Ok(())
    })
    .unwrap();

    // the key survives relabelling, so loggers can record both
    assert_eq!(pipeline.steps()[0].argument(), Some("lookup_key"));
    assert_eq!(pipeline.steps()[0].label(), "relabelled");
    assert_eq!(pipeline.steps()[0].report().argument.as_deref(), Some("lookup_key"));

    // callables have no key form
    assert_eq!(pipeline.steps()[1].argument(), None);
}

#[test]
fn callable_arguments_construct_themselves() {
    let mut pipeline: Pipeline<serde_json::Value> = Pipeline::configure(|p| {
        p.step(StepArgument::call(|_, change_set: &serde_json::Value| {
            let mut next = change_set.clone();
            next["touched"] = json!(true);
            Ok(Some(next))
        }))
        .register()?;
        Ok(())
    })
    .unwrap();

    // callables default their label to the step index
    assert_eq!(pipeline.steps()[0].label(), "0");
    assert_eq!(pipeline.steps()[0].constructor_name(), "inline");

    let result = pipeline.execute(json!({})).unwrap();
    assert_eq!(result, json!({ "touched": true }));
    assert_eq!(pipeline.steps()[0].status(), StepStatus::Success);
}
