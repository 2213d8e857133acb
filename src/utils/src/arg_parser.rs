// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Minimal `--name value` command line parser used by `dsmctl`.

use std::collections::BTreeMap;
use std::{env, fmt};

const ARG_PREFIX: &str = "--";
const HELP_ARG: &str = "--help";
const VERSION_ARG: &str = "--version";

/// Errors associated with parsing and validating arguments.
#[derive(Debug, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum ArgParserError {
    /// Argument '{0}' required, but not found.
    MissingArgument(String),
    /// The argument '{0}' requires a value, but none was supplied.
    MissingValue(String),
    /// Found argument '{0}' which wasn't expected, or isn't valid in this context.
    UnexpectedArgument(String),
    /// The argument '{0}' was provided more than once.
    DuplicateArgument(String),
    /// The argument '{0}' cannot be used together with '{1}'.
    ConflictingArguments(String, String),
}

/// Result type of the argument parser.
pub type Result<T> = std::result::Result<T, ArgParserError>;

/// Keep information about the argument parser.
#[derive(Clone, Debug, Default)]
pub struct ArgParser<'a> {
    arguments: Arguments<'a>,
}

impl<'a> ArgParser<'a> {
    /// Create a new ArgParser instance.
    pub fn new() -> Self {
        ArgParser::default()
    }

    /// Add an argument with its associated `Argument` in `arguments`.
    pub fn arg(mut self, argument: Argument<'a>) -> Self {
        self.arguments.insert_arg(argument);
        self
    }

    /// Parse the command line arguments of the current process.
    pub fn parse_from_cmdline(&mut self) -> Result<()> {
        let args: Vec<String> = env::args().collect();
        self.parse_args(&args)
    }

    /// Parse `args`, whose first element is the name of the binary.
    pub fn parse_args(&mut self, args: &[String]) -> Result<()> {
        self.arguments.parse(args)
    }

    /// Concatenate the `help` information of every possible argument
    /// in a message that represents the correct command line usage.
    pub fn formatted_help(&self) -> String {
        let mut help_builder = vec![];

        let required_arguments = self.format_arguments(true);
        if !required_arguments.is_empty() {
            help_builder.push("required arguments:".to_string());
            help_builder.push(required_arguments);
        }

        let optional_arguments = self.format_arguments(false);
        if !optional_arguments.is_empty() {
            if !help_builder.is_empty() {
                help_builder.push(String::new());
            }

            help_builder.push("optional arguments:".to_string());
            help_builder.push(optional_arguments);
        }

        help_builder.join("\n")
    }

    /// Return a reference to `arguments` field.
    pub fn arguments(&self) -> &Arguments<'a> {
        &self.arguments
    }

    // Align arguments by setting width to length of the longest argument.
    fn format_arguments(&self, is_required: bool) -> String {
        let filtered_arguments = self
            .arguments
            .args
            .values()
            .filter(|arg| is_required == arg.required)
            .collect::<Vec<_>>();

        let max_arg_width = filtered_arguments
            .iter()
            .map(|arg| arg.format_name().len())
            .max()
            .unwrap_or(0);

        filtered_arguments
            .into_iter()
            .map(|arg| arg.format_help(max_arg_width))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stores the characteristics of the `name` command line argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Argument<'a> {
    name: &'a str,
    required: bool,
    conflicts_with: Option<&'a str>,
    takes_value: bool,
    default_value: Option<Value>,
    help: Option<&'a str>,
    user_value: Option<Value>,
}

impl<'a> Argument<'a> {
    /// Create a new `Argument` that keeps the necessary information for an argument.
    pub fn new(name: &'a str) -> Argument<'a> {
        Argument {
            name,
            required: false,
            conflicts_with: None,
            takes_value: false,
            default_value: None,
            help: None,
            user_value: None,
        }
    }

    /// Set if the argument *must* be provided by user.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Reject the command line when both `self` and `other_arg` are present.
    pub fn conflicts_with(mut self, other_arg: &'a str) -> Self {
        self.conflicts_with = Some(other_arg);
        self
    }

    /// If `takes_value` is true, then the user *must* provide a value for the
    /// argument, otherwise that argument is a flag.
    pub fn takes_value(mut self, takes_value: bool) -> Self {
        self.takes_value = takes_value;
        self
    }

    /// Value used when the user didn't provide one.
    pub fn default_value(mut self, default_value: &'a str) -> Self {
        self.default_value = Some(Value::String(String::from(default_value)));
        self
    }

    /// Set the information that will be displayed for the argument when user passes
    /// `--help` flag.
    pub fn help(mut self, help: &'a str) -> Self {
        self.help = Some(help);
        self
    }

    fn format_help(&self, arg_width: usize) -> String {
        let mut help_builder = vec![];

        let arg = self.format_name();
        help_builder.push(format!("{:<arg_width$}", arg, arg_width = arg_width));

        // Three whitespaces between the argument and its help message.
        help_builder.push("   ".to_string());

        match (self.help, &self.default_value) {
            (Some(help), Some(default_value)) => {
                help_builder.push(format!("{} [default: {}]", help, default_value))
            }
            (Some(help), None) => help_builder.push(help.to_string()),
            (None, Some(default_value)) => {
                help_builder.push(format!("[default: {}]", default_value))
            }
            (None, None) => (),
        };

        help_builder.concat()
    }

    fn format_name(&self) -> String {
        if self.takes_value {
            format!("  --{name} <{name}>", name = self.name)
        } else {
            format!("  --{}", self.name)
        }
    }
}

/// Represents the value of an argument, which will be a `String` if
/// the argument takes a value, or `bool` if it's a flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// Flag value.
    Bool(bool),
    /// Value of an argument that takes one.
    String(String),
}

impl Value {
    fn as_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.to_string()),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Stores the arguments of the parser.
#[derive(Clone, Debug, Default)]
pub struct Arguments<'a> {
    args: BTreeMap<&'a str, Argument<'a>>,
}

impl<'a> Arguments<'a> {
    fn insert_arg(&mut self, argument: Argument<'a>) {
        self.args.insert(argument.name, argument);
    }

    fn value_of(&self, arg_name: &str) -> Option<&Value> {
        self.args.get(arg_name).and_then(|argument| {
            argument
                .user_value
                .as_ref()
                .or(argument.default_value.as_ref())
        })
    }

    /// Return the value of an argument if the argument exists and has the type
    /// String. Otherwise return None.
    pub fn single_value(&self, arg_name: &str) -> Option<String> {
        self.value_of(arg_name).and_then(Value::as_string)
    }

    /// Return the value of an argument if the argument exists and has the type
    /// bool. Otherwise return None.
    pub fn flag_present(&self, arg_name: &str) -> bool {
        self.value_of(arg_name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Split `args` between the `--help`/`--version` short circuits and regular parsing.
    pub fn parse(&mut self, args: &[String]) -> Result<()> {
        // The first element of `args` is the name of the binary.
        let args = args.get(1..).unwrap_or_default();

        for (special, name) in [(HELP_ARG, "help"), (VERSION_ARG, "version")] {
            if args.iter().any(|arg| arg == special) {
                let mut arg = Argument::new(name);
                arg.user_value = Some(Value::Bool(true));
                self.insert_arg(arg);
                return Ok(());
            }
        }

        self.populate_args(args)
    }

    fn validate_requirements(&self) -> Result<()> {
        for argument in self.args.values() {
            if argument.required && argument.user_value.is_none() {
                return Err(ArgParserError::MissingArgument(argument.name.to_string()));
            }
            if argument.user_value.is_none() {
                continue;
            }
            if let Some(other) = argument.conflicts_with {
                let other_present = self
                    .args
                    .get(other)
                    .is_some_and(|arg| arg.user_value.is_some());
                if other_present {
                    return Err(ArgParserError::ConflictingArguments(
                        argument.name.to_string(),
                        other.to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn populate_args(&mut self, args: &[String]) -> Result<()> {
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let arg_name = arg
                .strip_prefix(ARG_PREFIX)
                .ok_or_else(|| ArgParserError::UnexpectedArgument(arg.to_string()))?;

            let argument = self
                .args
                .get_mut(arg_name)
                .ok_or_else(|| ArgParserError::UnexpectedArgument(arg_name.to_string()))?;

            if argument.user_value.is_some() {
                return Err(ArgParserError::DuplicateArgument(arg_name.to_string()));
            }

            let arg_val = if argument.takes_value {
                let val = iter
                    .next()
                    .filter(|v| !v.starts_with(ARG_PREFIX))
                    .ok_or_else(|| ArgParserError::MissingValue(argument.name.to_string()))?;
                Value::String(val.clone())
            } else {
                Value::Bool(true)
            };

            argument.user_value = Some(arg_val);
        }

        self.validate_requirements()
    }
}
