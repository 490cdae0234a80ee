use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Attribute, Ident, LitInt, LitStr, Result, Token, braced, parenthesized,
    parse::{Parse, ParseStream},
    parse_macro_input,
};

/// Number of operand words an opcode takes
#[derive(Clone)]
enum Arity {
    /// Exactly this many operands
    Fixed(usize),
    /// Any number of operands (calls, composites)
    Variadic,
}

/// A single opcode row
struct Entry {
    attrs: Vec<Attribute>,
    name: Ident,
    code: LitInt,
    mnemonic: LitStr,
    has_result: bool,
    arity: Arity,
}

/// The full opcode_table input
struct OpcodeTable {
    attrs: Vec<Attribute>,
    enum_name: Ident,
    entries: Vec<Entry>,
}

impl Parse for OpcodeTable {
    fn parse(input: ParseStream) -> Result<Self> {
        // Parse attributes (doc comments)
        let attrs = input.call(Attribute::parse_outer)?;
        let enum_name: Ident = input.parse()?;

        let content;
        braced!(content in input);

        let mut entries = Vec::new();
        while !content.is_empty() {
            // Name = 0x10 => "mnemonic" [->] (arity);
            let attrs = content.call(Attribute::parse_outer)?;
            let name: Ident = content.parse()?;
            content.parse::<Token![=]>()?;
            let code: LitInt = content.parse()?;
            content.parse::<Token![=>]>()?;
            let mnemonic: LitStr = content.parse()?;

            let has_result = if content.peek(Token![->]) {
                content.parse::<Token![->]>()?;
                true
            } else {
                false
            };

            let arity_content;
            parenthesized!(arity_content in content);
            let arity = if arity_content.peek(Token![*]) {
                arity_content.parse::<Token![*]>()?;
                Arity::Variadic
            } else {
                let count: LitInt = arity_content.parse()?;
                Arity::Fixed(count.base10_parse()?)
            };

            content.parse::<Token![;]>()?;

            entries.push(Entry {
                attrs,
                name,
                code,
                mnemonic,
                has_result,
                arity,
            });
        }

        check_unique_codes(&entries)?;

        Ok(OpcodeTable {
            attrs,
            enum_name,
            entries,
        })
    }
}

fn check_unique_codes(entries: &[Entry]) -> Result<()> {
    let mut seen: Vec<(u16, &Ident)> = Vec::new();
    for entry in entries {
        let code: u16 = entry.code.base10_parse()?;
        if let Some((_, prev)) = seen.iter().find(|(c, _)| *c == code) {
            return Err(syn::Error::new(
                entry.code.span(),
                format!("opcode {:#x} already used by `{}`", code, prev),
            ));
        }
        seen.push((code, &entry.name));
    }
    Ok(())
}

fn generate_arity(enum_name: &Ident, entry: &Entry) -> TokenStream2 {
    let name = &entry.name;
    match entry.arity {
        Arity::Fixed(count) => quote! { #enum_name::#name => Some(#count) },
        Arity::Variadic => quote! { #enum_name::#name => None },
    }
}

#[proc_macro]
pub fn opcode_table(input: TokenStream) -> TokenStream {
    let table = parse_macro_input!(input as OpcodeTable);

    let attrs = &table.attrs;
    let enum_name = &table.enum_name;

    let variants: Vec<_> = table
        .entries
        .iter()
        .map(|e| {
            let attrs = &e.attrs;
            let name = &e.name;
            let code = &e.code;
            quote! {
                #(#attrs)*
                #name = #code
            }
        })
        .collect();

    let names: Vec<_> = table.entries.iter().map(|e| &e.name).collect();
    let codes: Vec<_> = table.entries.iter().map(|e| &e.code).collect();
    let mnemonics: Vec<_> = table.entries.iter().map(|e| &e.mnemonic).collect();
    let results: Vec<_> = table.entries.iter().map(|e| e.has_result).collect();
    let arities: Vec<_> = table
        .entries
        .iter()
        .map(|e| generate_arity(enum_name, e))
        .collect();

    let expanded = quote! {
        #(#attrs)*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum #enum_name {
            #(#variants),*
        }

        impl #enum_name {
            /// Every opcode in table order.
            pub const ALL: &'static [#enum_name] = &[#(#enum_name::#names),*];

            /// Decodes a raw opcode value.
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    #(#codes => Some(#enum_name::#names),)*
                    _ => None,
                }
            }

            /// Raw opcode value.
            pub fn code(self) -> u16 {
                self as u16
            }

            /// Assembly mnemonic.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    #(#enum_name::#names => #mnemonics,)*
                }
            }

            /// Whether the instruction defines a result value.
            pub fn has_result(self) -> bool {
                match self {
                    #(#enum_name::#names => #results,)*
                }
            }

            /// Operand count, or `None` for variadic instructions.
            pub fn operand_count(self) -> Option<usize> {
                match self {
                    #(#arities,)*
                }
            }
        }

        impl ::std::fmt::Display for #enum_name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.mnemonic())
            }
        }
    };

    TokenStream::from(expanded)
}
