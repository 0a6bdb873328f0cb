#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
mod bdd_tests {
    use crate::cli::{
        parse_cli_args, split_global_options, suggest_commands, CliAction, CliCommand, CliError,
        OutputFormat,
    };
    use std::path::PathBuf;

    fn given_cli_args(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn when_no_args_then_show_help() {
        let args = given_cli_args(&[]);
        let action = parse_cli_args(&args).expect("parse");

        assert!(matches!(action, CliAction::ShowHelp));
    }

    #[test]
    fn when_version_flag_then_show_version() {
        let args = given_cli_args(&["-v"]);
        let action = parse_cli_args(&args).expect("parse");

        assert!(matches!(action, CliAction::ShowVersion));
    }

    #[test]
    fn when_ask_command_then_ask_action_with_values() {
        let args = given_cli_args(&[
            "ask",
            "--connection",
            "shop",
            "--question",
            "total sales by month for 2024",
            "--fast",
        ]);
        let action = parse_cli_args(&args).expect("parse");

        match action {
            CliAction::Command(CliCommand::Ask {
                connection,
                question,
                thread,
                fast,
                ..
            }) => {
                assert_eq!(connection, "shop");
                assert_eq!(question, "total sales by month for 2024");
                assert_eq!(thread, None);
                assert_eq!(fast, Some(true));
            }
            other => panic!("Expected Ask command, got {other:?}"),
        }
    }

    #[test]
    fn when_ask_without_question_then_missing_arg() {
        let args = given_cli_args(&["ask", "--connection", "shop"]);
        let result = parse_cli_args(&args);

        assert!(matches!(result, Err(CliError::MissingRequiredArg { arg }) if arg == "question"));
    }

    #[test]
    fn when_resume_with_answers_then_pairs_are_kept_in_order() {
        let args = given_cli_args(&[
            "resume",
            "--thread",
            "t-1",
            "--answer",
            "subject=Orders",
            "--answer",
            "time_range=Last 30 days",
        ]);
        let action = parse_cli_args(&args).expect("parse");

        match action {
            CliAction::Command(CliCommand::Resume { thread, answers }) => {
                assert_eq!(thread, "t-1");
                assert_eq!(
                    answers,
                    vec![
                        ("subject".to_string(), "Orders".to_string()),
                        ("time_range".to_string(), "Last 30 days".to_string()),
                    ]
                );
            }
            other => panic!("Expected Resume command, got {other:?}"),
        }
    }

    #[test]
    fn when_answer_has_no_equals_then_invalid_value() {
        let args = given_cli_args(&["resume", "--thread", "t-1", "--answer", "Orders"]);
        let result = parse_cli_args(&args);

        assert!(matches!(result, Err(CliError::InvalidArgValue { .. })));
    }

    #[test]
    fn when_unknown_flag_then_error() {
        let args = given_cli_args(&["check-sql", "--sql", "SELECT 1", "--force"]);
        let result = parse_cli_args(&args);

        assert!(matches!(result, Err(CliError::UnknownFlag { flag }) if flag == "--force"));
    }

    #[test]
    fn when_unknown_command_then_error_and_suggestion() {
        let args = given_cli_args(&["aks"]);
        let result = parse_cli_args(&args);

        assert!(matches!(result, Err(CliError::UnknownCommand { .. })));
        assert_eq!(suggest_commands("aks"), vec!["ask".to_string()]);
        assert!(suggest_commands("completely-different").is_empty());
    }

    #[test]
    fn global_options_are_removed_wherever_they_appear() {
        let args = given_cli_args(&["show", "--json", "--thread", "t-1", "--config", "c.toml"]);
        let (options, rest) = split_global_options(&args).expect("split");

        assert_eq!(options.output, OutputFormat::Json);
        assert_eq!(options.config, Some(PathBuf::from("c.toml")));
        assert_eq!(rest, given_cli_args(&["show", "--thread", "t-1"]));
    }
}
